use serde::{Deserialize, Serialize};
use std::fmt;

/// Deployment a dataset is fetched from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Environment {
    #[serde(rename = "UAT")]
    Uat,
    #[serde(rename = "PROD")]
    Prod,
    #[serde(rename = "EXCEPTIONS")]
    Exceptions,
}

impl Environment {
    /// Environments that carry trade datasets
    pub const TRADE_ENVIRONMENTS: [Environment; 2] = [Environment::Uat, Environment::Prod];

    pub fn name(&self) -> &'static str {
        match self {
            Environment::Uat => "UAT",
            Environment::Prod => "PROD",
            Environment::Exceptions => "EXCEPTIONS",
        }
    }

    pub fn is_trade_environment(&self) -> bool {
        matches!(self, Environment::Uat | Environment::Prod)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
