//! Trade and exception rows as stored in the flat dataset files

use serde::{Deserialize, Deserializer, Serialize};

const OUT_OF_SCOPE_MARKER: &str = "out of scope";

/// A single trade row from one environment's dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub legal_entity: Option<String>,
    #[serde(default)]
    pub source_system: Option<String>,
    pub ccy_pair: String,
    #[serde(default)]
    pub trade_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub deviation_percent: f64,
    #[serde(default)]
    pub alert_description: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_out_of_scope: bool,
}

impl TradeRecord {
    pub fn new(trade_id: impl Into<String>, ccy_pair: impl Into<String>, deviation_percent: f64) -> Self {
        Self {
            trade_id: trade_id.into(),
            product_type: None,
            legal_entity: None,
            source_system: None,
            ccy_pair: ccy_pair.into(),
            trade_date: None,
            deviation_percent,
            alert_description: None,
            is_out_of_scope: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.alert_description = Some(description.into());
        self
    }

    pub fn with_legal_entity(mut self, legal_entity: impl Into<String>) -> Self {
        self.legal_entity = Some(legal_entity.into());
        self
    }

    pub fn marked_out_of_scope(mut self) -> Self {
        self.is_out_of_scope = true;
        self
    }

    /// Flagged, or annotated "out of scope" in any letter case
    pub fn is_excluded(&self) -> bool {
        self.is_out_of_scope
            || self
                .alert_description
                .as_deref()
                .map(|d| d.to_lowercase().contains(OUT_OF_SCOPE_MARKER))
                .unwrap_or(false)
    }

    /// Split a 6-character pair code into (base, quote)
    pub fn currencies(&self) -> Option<(&str, &str)> {
        let code = self.ccy_pair.trim();
        if code.len() != 6 || !code.is_ascii() {
            return None;
        }
        Some(code.split_at(3))
    }
}

/// Row of the exceptions dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub trade_id: String,
    pub exception_type: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(match raw.as_deref().map(str::trim) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "y"),
        None => false,
    })
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(0.0),
        Some(v) => v.parse::<f64>().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currencies_split() {
        let record = TradeRecord::new("1", "EURUSD", 0.2);
        assert_eq!(record.currencies(), Some(("EUR", "USD")));
    }

    #[test]
    fn test_currencies_rejects_malformed_codes() {
        assert!(TradeRecord::new("1", "EUR/USD", 0.2).currencies().is_none());
        assert!(TradeRecord::new("1", "EURUS", 0.2).currencies().is_none());
        assert!(TradeRecord::new("1", "", 0.2).currencies().is_none());
    }

    #[test]
    fn test_excluded_by_flag_or_description() {
        assert!(TradeRecord::new("1", "EURUSD", 1.0).marked_out_of_scope().is_excluded());
        assert!(TradeRecord::new("2", "EURUSD", 1.0)
            .with_description("Trade is OUT OF SCOPE for review")
            .is_excluded());
        assert!(!TradeRecord::new("3", "EURUSD", 1.0)
            .with_description("Deviation 1.0% detected")
            .is_excluded());
        assert!(!TradeRecord::new("4", "EURUSD", 1.0).is_excluded());
    }

    #[test]
    fn test_csv_round_trip_accepts_python_booleans() {
        let data = "trade_id,ccy_pair,deviation_percent,alert_description,is_out_of_scope\n\
                    TRD-1,EURUSD,0.75,,True\n\
                    TRD-2,GBPUSD,,Deviation detected,False\n";
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        let records: Vec<TradeRecord> = reader.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].is_out_of_scope);
        assert_eq!(records[0].alert_description, None);
        assert_eq!(records[1].deviation_percent, 0.0);
        assert!(!records[1].is_out_of_scope);
    }
}
