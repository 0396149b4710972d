//! Trade Source Factory
//!
//! Builds the `TradeSource` selected by configuration. The HTTP source needs
//! both environment base URLs; without them the factory falls back to the
//! fixture generator so the service can still start.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{ReconConfig, TradeSourceKind};
use crate::domain::repositories::trade_source::TradeSource;
use crate::infrastructure::fixture_trade_source::FixtureTradeSource;
use crate::infrastructure::http_trade_source::{EnvironmentEndpoint, HttpTradeSource};

pub struct TradeSourceFactory;

impl TradeSourceFactory {
    pub fn create(config: &ReconConfig) -> Arc<dyn TradeSource> {
        match config.trade_source {
            TradeSourceKind::Http => match Self::create_http_source(config) {
                Some(source) => source,
                None => {
                    warn!("HTTP trade source unavailable, falling back to fixture data");
                    Self::create_fixture_source(config)
                }
            },
            TradeSourceKind::Fixture => Self::create_fixture_source(config),
        }
    }

    fn create_http_source(config: &ReconConfig) -> Option<Arc<dyn TradeSource>> {
        let (Some(uat), Some(prod)) = (&config.uat_base_url, &config.prod_base_url) else {
            error!("RECON_UAT_BASE_URL and RECON_PROD_BASE_URL must both be set for the HTTP trade source");
            return None;
        };

        match HttpTradeSource::new(
            EnvironmentEndpoint::new(uat.clone(), config.uat_token.clone()),
            EnvironmentEndpoint::new(prod.clone(), config.prod_token.clone()),
            Duration::from_millis(config.fetch_timeout_ms),
        ) {
            Ok(source) => {
                info!("✓ HTTP trade source created");
                Some(Arc::new(source) as Arc<dyn TradeSource>)
            }
            Err(e) => {
                error!("✗ Failed to create HTTP trade source: {}", e);
                None
            }
        }
    }

    fn create_fixture_source(config: &ReconConfig) -> Arc<dyn TradeSource> {
        info!(
            records_per_dataset = config.fixture_records,
            "✓ Fixture trade source created"
        );
        Arc::new(FixtureTradeSource::new(config.fixture_records))
    }
}
