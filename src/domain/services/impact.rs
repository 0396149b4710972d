use crate::domain::entities::threshold::{ThresholdImpact, ThresholdRow, UpdateTarget};
use crate::domain::entities::trade_record::TradeRecord;

/// Compare alert volume under the current adjusted thresholds of the rows
/// selected by `target` with the volume if they were all set to `new_value`.
///
/// A trade belongs to a row when it was booked under the row's legal entity
/// and either leg of its pair is the row's currency. A trade alerts when its
/// deviation is strictly above the threshold. Trades in scope of several
/// rows are counted once, against the lowest current threshold.
pub fn threshold_impact(
    rows: &[ThresholdRow],
    target: &UpdateTarget,
    new_value: f64,
    trades: &[TradeRecord],
) -> ThresholdImpact {
    let selected: Vec<&ThresholdRow> = rows.iter().filter(|r| r.matches(target)).collect();

    let mut current_alerts = 0;
    let mut new_alerts = 0;
    for trade in trades {
        let current_threshold = selected
            .iter()
            .filter(|row| in_scope(trade, row))
            .map(|row| row.adjusted_threshold)
            .reduce(f64::min);

        let Some(current_threshold) = current_threshold else {
            continue;
        };
        if trade.deviation_percent > current_threshold {
            current_alerts += 1;
        }
        if trade.deviation_percent > new_value {
            new_alerts += 1;
        }
    }

    ThresholdImpact::new(current_alerts, new_alerts)
}

fn in_scope(trade: &TradeRecord, row: &ThresholdRow) -> bool {
    if trade.legal_entity.as_deref() != Some(row.legal_entity.as_str()) {
        return false;
    }
    match trade.currencies() {
        Some((base, quote)) => base == row.currency || quote == row.currency,
        None => false,
    }
}
