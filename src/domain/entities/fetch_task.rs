//! Reconciliation requests and the fetch tasks planned from them

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::entities::environment::Environment;
use crate::domain::errors::{ReconError, ReconResult};

/// Wire format for dates in requests and file names
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Placeholder used for the entity/system columns of the exceptions task
pub const ALL_SCOPE: &str = "ALL";

/// Inclusive trading date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> ReconResult<Self> {
        if start > end {
            return Err(ReconError::Validation(format!(
                "start_date {} is after end_date {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> ReconResult<Self> {
        Self::new(parse_date("start_date", start)?, parse_date("end_date", end)?)
    }

    pub fn start_str(&self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format(DATE_FORMAT).to_string()
    }
}

fn parse_date(field: &str, value: &str) -> ReconResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|e| {
        ReconError::Validation(format!("{} '{}' is not a YYYY-MM-DD date: {}", field, value, e))
    })
}

/// Inbound request as received from a caller; every field is optional so that
/// missing fields can be reported together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconciliationRequestPayload {
    pub product_type: Option<String>,
    pub legal_entities: Option<Vec<String>>,
    pub source_systems: Option<Vec<String>>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub download_trades: Option<bool>,
    pub download_exceptions: Option<bool>,
}

impl ReconciliationRequestPayload {
    /// Validate presence of the required fields and build a typed request
    pub fn validate(self) -> ReconResult<ReconciliationRequest> {
        let mut missing = Vec::new();
        if self.product_type.as_deref().map_or(true, |p| p.trim().is_empty()) {
            missing.push("product_type");
        }
        if self.legal_entities.is_none() {
            missing.push("legal_entities");
        }
        if self.source_systems.is_none() {
            missing.push("source_systems");
        }
        if self.start_date.is_none() {
            missing.push("start_date");
        }
        if self.end_date.is_none() {
            missing.push("end_date");
        }
        if !missing.is_empty() {
            return Err(ReconError::Validation(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        let date_range = DateRange::parse(
            self.start_date.as_deref().unwrap_or_default(),
            self.end_date.as_deref().unwrap_or_default(),
        )?;

        let product_type = clean_name("product_type", &self.product_type.unwrap_or_default())?;
        let legal_entities = clean_names("legal_entities", self.legal_entities.unwrap_or_default())?;
        let source_systems = clean_names("source_systems", self.source_systems.unwrap_or_default())?;

        Ok(ReconciliationRequest {
            product_type,
            legal_entities,
            source_systems,
            date_range,
            download_trades: self.download_trades.unwrap_or(true),
            download_exceptions: self.download_exceptions.unwrap_or(true),
        })
    }
}

/// Trimmed, validated names in first-seen order with duplicates dropped
fn clean_names(field: &str, names: Vec<String>) -> ReconResult<Vec<String>> {
    let mut cleaned: Vec<String> = Vec::with_capacity(names.len());
    for name in &names {
        let name = clean_name(field, name)?;
        if !cleaned.contains(&name) {
            cleaned.push(name);
        }
    }
    Ok(cleaned)
}

/// Names end up in dataset file names, so only `[A-Za-z0-9_-]` is accepted
fn clean_name(field: &str, name: &str) -> ReconResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ReconError::Validation(format!("{} contains a blank entry", field)));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ReconError::Validation(format!(
            "{} entry '{}' may only contain letters, digits, '_' and '-'",
            field, trimmed
        )));
    }
    Ok(trimmed.to_string())
}

/// Validated reconciliation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRequest {
    pub product_type: String,
    pub legal_entities: Vec<String>,
    pub source_systems: Vec<String>,
    pub date_range: DateRange,
    pub download_trades: bool,
    pub download_exceptions: bool,
}

impl ReconciliationRequest {
    /// Number of fetch tasks this request fans out to
    pub fn expected_task_count(&self) -> usize {
        let trades = if self.download_trades {
            self.legal_entities.len() * self.source_systems.len() * 2
        } else {
            0
        };
        trades + usize::from(self.download_exceptions)
    }

    pub fn dataset_key(&self, legal_entity: &str, source_system: &str) -> DatasetKey {
        DatasetKey {
            product_type: self.product_type.clone(),
            legal_entity: legal_entity.to_string(),
            source_system: source_system.to_string(),
            date_range: self.date_range,
        }
    }

    /// Plan one task per entity x system x {UAT, PROD}, plus the exceptions task
    pub fn plan_tasks(&self) -> Vec<FetchTask> {
        let mut tasks = Vec::with_capacity(self.expected_task_count());

        if self.download_trades {
            for legal_entity in &self.legal_entities {
                for source_system in &self.source_systems {
                    for environment in Environment::TRADE_ENVIRONMENTS {
                        tasks.push(FetchTask {
                            legal_entity: legal_entity.clone(),
                            source_system: source_system.clone(),
                            environment,
                            product_type: self.product_type.clone(),
                            date_range: self.date_range,
                        });
                    }
                }
            }
        }

        if self.download_exceptions {
            tasks.push(FetchTask {
                legal_entity: ALL_SCOPE.to_string(),
                source_system: ALL_SCOPE.to_string(),
                environment: Environment::Exceptions,
                product_type: self.product_type.clone(),
                date_range: self.date_range,
            });
        }

        tasks
    }
}

/// One scheduled unit of retrieval work
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchTask {
    pub legal_entity: String,
    pub source_system: String,
    pub environment: Environment,
    pub product_type: String,
    pub date_range: DateRange,
}

impl FetchTask {
    pub fn dataset_key(&self) -> DatasetKey {
        DatasetKey {
            product_type: self.product_type.clone(),
            legal_entity: self.legal_entity.clone(),
            source_system: self.source_system.clone(),
            date_range: self.date_range,
        }
    }

    pub fn label(&self) -> String {
        format!(
            "{}/{}/{}",
            self.legal_entity, self.source_system, self.environment
        )
    }
}

/// Identifies one stored dataset per environment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetKey {
    pub product_type: String,
    pub legal_entity: String,
    pub source_system: String,
    pub date_range: DateRange,
}

impl DatasetKey {
    /// `ProductType_LegalEntity_SourceSystem_StartDate_EndDate`
    pub fn file_stem(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            self.product_type,
            self.legal_entity,
            self.source_system,
            self.date_range.start_str(),
            self.date_range.end_str()
        )
    }

    /// Key used for per-pair matching results
    pub fn pair_label(&self) -> String {
        format!("{}_{}", self.legal_entity, self.source_system)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> ReconciliationRequestPayload {
        ReconciliationRequestPayload {
            product_type: Some("FX_SPOT".to_string()),
            legal_entities: Some(vec!["GSLB".to_string(), "GSI".to_string()]),
            source_systems: Some(vec!["SLANG".to_string(), "SIGMA".to_string()]),
            start_date: Some("2024-01-01".to_string()),
            end_date: Some("2024-01-31".to_string()),
            download_trades: None,
            download_exceptions: None,
        }
    }

    #[test]
    fn test_validate_defaults_download_flags_to_true() {
        let request = payload().validate().unwrap();
        assert!(request.download_trades);
        assert!(request.download_exceptions);
        assert_eq!(request.date_range.start_str(), "2024-01-01");
    }

    #[test]
    fn test_validate_reports_all_missing_fields() {
        let err = ReconciliationRequestPayload {
            product_type: Some("FX_SPOT".to_string()),
            ..Default::default()
        }
        .validate()
        .unwrap_err();

        match err {
            ReconError::Validation(msg) => {
                assert!(msg.contains("legal_entities"));
                assert!(msg.contains("source_systems"));
                assert!(msg.contains("start_date"));
                assert!(msg.contains("end_date"));
                assert!(!msg.contains("product_type"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let mut p = payload();
        p.start_date = Some("2024-02-01".to_string());
        assert!(matches!(p.validate(), Err(ReconError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_bad_date() {
        let mut p = payload();
        p.end_date = Some("31/01/2024".to_string());
        assert!(matches!(p.validate(), Err(ReconError::Validation(_))));
    }

    #[test]
    fn test_plan_tasks_counts() {
        let request = payload().validate().unwrap();
        let tasks = request.plan_tasks();
        assert_eq!(tasks.len(), 2 * 2 * 2 + 1);
        assert_eq!(tasks.len(), request.expected_task_count());
        assert_eq!(
            tasks
                .iter()
                .filter(|t| t.environment == Environment::Exceptions)
                .count(),
            1
        );
    }

    #[test]
    fn test_plan_tasks_without_exceptions_or_trades() {
        let mut p = payload();
        p.download_exceptions = Some(false);
        let request = p.validate().unwrap();
        assert_eq!(request.plan_tasks().len(), 8);

        let mut p = payload();
        p.download_trades = Some(false);
        let request = p.validate().unwrap();
        let tasks = request.plan_tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].legal_entity, ALL_SCOPE);
    }

    #[test]
    fn test_validate_rejects_path_like_names() {
        for hostile in ["x/../../escaped", "..", "GS I", "a\\b", "GSI.tmp"] {
            let mut p = payload();
            p.legal_entities = Some(vec![hostile.to_string()]);
            let err = p.validate().unwrap_err();
            assert!(
                matches!(&err, ReconError::Validation(msg) if msg.contains("legal_entities")),
                "{} was accepted: {:?}",
                hostile,
                err
            );
        }

        let mut p = payload();
        p.source_systems = Some(vec!["../SLANG".to_string()]);
        assert!(matches!(p.validate(), Err(ReconError::Validation(msg)) if msg.contains("source_systems")));

        let mut p = payload();
        p.product_type = Some("FX/SPOT".to_string());
        assert!(matches!(p.validate(), Err(ReconError::Validation(msg)) if msg.contains("product_type")));
    }

    #[test]
    fn test_validate_drops_duplicate_names() {
        let mut p = payload();
        p.legal_entities = Some(vec!["GSI".to_string(), " GSI".to_string(), "GSLB".to_string(), "GSI".to_string()]);
        p.source_systems = Some(vec!["SLANG".to_string(), "SLANG".to_string()]);
        let request = p.validate().unwrap();
        assert_eq!(request.legal_entities, vec!["GSI", "GSLB"]);
        assert_eq!(request.source_systems, vec!["SLANG"]);
        assert_eq!(request.plan_tasks().len(), 2 * 2 + 1);
    }

    #[test]
    fn test_file_stem_layout() {
        let request = payload().validate().unwrap();
        let key = request.dataset_key("GSI", "SLANG");
        assert_eq!(key.file_stem(), "FX_SPOT_GSI_SLANG_2024-01-01_2024-01-31");
        assert_eq!(key.pair_label(), "GSI_SLANG");
    }
}
