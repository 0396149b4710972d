//! Deterministic generated datasets
//!
//! Produces realistic-looking FX spot datasets without an upstream service.
//! Output depends only on the task, so the same request always yields the
//! same data. PROD omits a small share of the trade ids present in UAT so
//! that reconciliation has something to report.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::entities::environment::Environment;
use crate::domain::entities::fetch_task::{DateRange, FetchTask, DATE_FORMAT};
use crate::domain::entities::trade_record::{ExceptionRecord, TradeRecord};
use crate::domain::repositories::trade_source::{FetchError, FetchResult, TradeSource};

pub const FIXTURE_CURRENCY_PAIRS: [&str; 6] = ["EURUSD", "GBPUSD", "USDJPY", "USDCHF", "USDCAD", "EURGBP"];

const EXCEPTION_COUNT: usize = 50;
const EXCEPTION_KINDS: [(&str, &str); 3] = [
    ("PRICE_DEVIATION", "Price deviation detected"),
    ("LIQUIDITY_ISSUE", "Low liquidity"),
    ("TIMEOUT", "Request timeout"),
];
const EXCEPTION_STATUSES: [&str; 3] = ["OPEN", "RESOLVED", "PENDING"];

/// Share of UAT trade ids missing from PROD
const PROD_GAP_RATE: f64 = 0.02;
const OUT_OF_SCOPE_RATE: f64 = 0.05;

pub struct FixtureTradeSource {
    records_per_dataset: usize,
}

impl FixtureTradeSource {
    pub fn new(records_per_dataset: usize) -> Self {
        Self {
            records_per_dataset,
        }
    }

    fn generate(&self, task: &FetchTask) -> Vec<TradeRecord> {
        let mut values = StdRng::seed_from_u64(seed(&[
            &task.product_type,
            &task.legal_entity,
            &task.source_system,
            task.environment.name(),
            &task.date_range.start_str(),
            &task.date_range.end_str(),
        ]));
        // Shared between environments so both agree on which ids exist
        let mut gaps = StdRng::seed_from_u64(seed(&[
            &task.product_type,
            &task.legal_entity,
            &task.source_system,
            &task.date_range.start_str(),
        ]));
        let span_days = (task.date_range.end - task.date_range.start).num_days().max(0);

        let mut records = Vec::with_capacity(self.records_per_dataset);
        for i in 0..self.records_per_dataset {
            let missing_in_prod = gaps.gen_bool(PROD_GAP_RATE);
            let ccy_pair = FIXTURE_CURRENCY_PAIRS[values.gen_range(0..FIXTURE_CURRENCY_PAIRS.len())];
            let deviation = f64::from(values.gen_range(1_000u32..30_000)) / 10_000.0;
            let trade_date = task.date_range.start + ChronoDuration::days(values.gen_range(0..=span_days));
            let out_of_scope = values.gen_bool(OUT_OF_SCOPE_RATE);

            if missing_in_prod && task.environment == Environment::Prod {
                continue;
            }

            let mut record = TradeRecord::new(
                format!("TRD-{}-{:06}", task.legal_entity, i + 1),
                ccy_pair,
                deviation,
            )
            .with_legal_entity(task.legal_entity.clone());
            record.product_type = Some(task.product_type.clone());
            record.source_system = Some(task.source_system.clone());
            record.trade_date = Some(trade_date.format(DATE_FORMAT).to_string());
            if deviation > 0.5 {
                record = record.with_description(format!("Deviation {}% detected", deviation));
            }
            if out_of_scope {
                record = record.marked_out_of_scope();
            }
            records.push(record);
        }
        records
    }
}

#[async_trait]
impl TradeSource for FixtureTradeSource {
    async fn fetch_trades(&self, task: &FetchTask) -> FetchResult<Vec<TradeRecord>> {
        if !task.environment.is_trade_environment() {
            return Err(FetchError::Unsupported(format!(
                "{} is not a trade environment",
                task.environment
            )));
        }
        Ok(self.generate(task))
    }

    async fn fetch_exceptions(&self, date_range: &DateRange) -> FetchResult<Vec<ExceptionRecord>> {
        let span_days = (date_range.end - date_range.start).num_days().max(0);
        Ok((0..EXCEPTION_COUNT)
            .map(|i| {
                let (exception_type, description) = EXCEPTION_KINDS[i % EXCEPTION_KINDS.len()];
                let offset = (i as i64) % (span_days + 1);
                ExceptionRecord {
                    trade_id: format!("TRD-{}-{:06}", date_range.start.format("%Y"), i + 1),
                    exception_type: exception_type.to_string(),
                    description: Some(description.to_string()),
                    status: EXCEPTION_STATUSES[i % EXCEPTION_STATUSES.len()].to_string(),
                    created_at: Some(
                        (date_range.end - ChronoDuration::days(offset))
                            .format(DATE_FORMAT)
                            .to_string(),
                    ),
                }
            })
            .collect())
    }

    fn name(&self) -> &str {
        "fixture"
    }
}

/// FNV-1a over the parts, stable across builds
fn seed(parts: &[&str]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for part in parts {
        for byte in part.bytes().chain(std::iter::once(0u8)) {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
    }
    hash
}
