use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::ReconError;

/// Column names an uploaded threshold file must carry
pub const REQUIRED_THRESHOLD_COLUMNS: [&str; 6] = [
    "LegalEntity",
    "CCY",
    "Original_Group",
    "Original_Threshold",
    "Proposed_Group",
    "Proposed_Threshold",
];

/// How thresholds are viewed and adjusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMode {
    Group,
    Currency,
}

impl ThresholdMode {
    pub const ALL: [ThresholdMode; 2] = [ThresholdMode::Group, ThresholdMode::Currency];

    pub fn tag(&self) -> &'static str {
        match self {
            ThresholdMode::Group => "group",
            ThresholdMode::Currency => "currency",
        }
    }
}

impl Default for ThresholdMode {
    fn default() -> Self {
        ThresholdMode::Group
    }
}

impl fmt::Display for ThresholdMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ThresholdMode {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "group" => Ok(ThresholdMode::Group),
            "currency" => Ok(ThresholdMode::Currency),
            other => Err(ReconError::Validation(format!(
                "Unknown threshold mode '{}' (expected 'group' or 'currency')",
                other
            ))),
        }
    }
}

/// One processed threshold row. Only the `adjusted_*` fields are mutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRow {
    #[serde(rename = "LegalEntity")]
    pub legal_entity: String,
    #[serde(rename = "CCY")]
    pub currency: String,
    #[serde(rename = "Original_Group")]
    pub original_group: String,
    #[serde(rename = "Original_Threshold")]
    pub original_threshold: f64,
    #[serde(rename = "Proposed_Group")]
    pub proposed_group: String,
    #[serde(rename = "Proposed_Threshold")]
    pub proposed_threshold: f64,
    #[serde(rename = "Adjusted_Group")]
    pub adjusted_group: String,
    #[serde(rename = "Adjusted_Threshold")]
    pub adjusted_threshold: f64,
}

impl ThresholdRow {
    /// Build a row with the adjusted columns seeded from the proposed ones
    pub fn from_proposal(
        legal_entity: impl Into<String>,
        currency: impl Into<String>,
        original_group: impl Into<String>,
        original_threshold: f64,
        proposed_group: impl Into<String>,
        proposed_threshold: f64,
    ) -> Self {
        let proposed_group = proposed_group.into();
        Self {
            legal_entity: legal_entity.into(),
            currency: currency.into(),
            original_group: original_group.into(),
            original_threshold,
            adjusted_group: proposed_group.clone(),
            proposed_group,
            proposed_threshold,
            adjusted_threshold: proposed_threshold,
        }
    }

    pub fn matches(&self, target: &UpdateTarget) -> bool {
        match target {
            UpdateTarget::Group(group) => &self.adjusted_group == group,
            UpdateTarget::Currency {
                legal_entity,
                currency,
            } => &self.legal_entity == legal_entity && &self.currency == currency,
        }
    }
}

/// Selects the rows an adjustment applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateTarget {
    Group(String),
    Currency {
        legal_entity: String,
        currency: String,
    },
}

impl UpdateTarget {
    pub fn group(name: impl Into<String>) -> Self {
        UpdateTarget::Group(name.into())
    }

    pub fn currency(legal_entity: impl Into<String>, currency: impl Into<String>) -> Self {
        UpdateTarget::Currency {
            legal_entity: legal_entity.into(),
            currency: currency.into(),
        }
    }

    pub fn mode(&self) -> ThresholdMode {
        match self {
            UpdateTarget::Group(_) => ThresholdMode::Group,
            UpdateTarget::Currency { .. } => ThresholdMode::Currency,
        }
    }
}

impl fmt::Display for UpdateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateTarget::Group(group) => write!(f, "group {}", group),
            UpdateTarget::Currency {
                legal_entity,
                currency,
            } => write!(f, "{}/{}", legal_entity, currency),
        }
    }
}

/// Group-mode view: one row per adjusted group, thresholds aggregated by max
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupThreshold {
    pub id: usize,
    pub group: String,
    pub original_threshold: f64,
    pub proposed_threshold: f64,
    pub adjusted_threshold: f64,
}

/// Currency-mode view: one row per stored record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyThreshold {
    pub id: usize,
    pub legal_entity: String,
    pub currency: String,
    pub group: String,
    pub original_threshold: f64,
    pub proposed_threshold: f64,
    pub adjusted_threshold: f64,
}

/// Result of reading thresholds, shaped by mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdListing {
    Group(Vec<GroupThreshold>),
    Currency(Vec<CurrencyThreshold>),
}

impl ThresholdListing {
    pub fn empty(mode: ThresholdMode) -> Self {
        match mode {
            ThresholdMode::Group => ThresholdListing::Group(Vec::new()),
            ThresholdMode::Currency => ThresholdListing::Currency(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ThresholdListing::Group(rows) => rows.len(),
            ThresholdListing::Currency(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub rows_processed: usize,
    pub threshold_mode: ThresholdMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdUpdateAck {
    pub mode: ThresholdMode,
    pub target: UpdateTarget,
    pub adjusted_threshold: f64,
    pub rows_updated: usize,
}

/// Alert counts before and after a proposed threshold change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdImpact {
    pub current_alerts: usize,
    pub new_alerts: usize,
    pub difference: i64,
    pub percentage_change: Option<f64>,
}

impl ThresholdImpact {
    pub fn new(current_alerts: usize, new_alerts: usize) -> Self {
        let difference = new_alerts as i64 - current_alerts as i64;
        let percentage_change = if current_alerts == 0 {
            None
        } else {
            Some(difference as f64 / current_alerts as f64 * 100.0)
        };
        Self {
            current_alerts,
            new_alerts,
            difference,
            percentage_change,
        }
    }
}
