use std::collections::BTreeMap;

use serde::Serialize;
use utoipa::ToSchema;

use crate::models::DailyStat;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DayCount {
    pub date: String,
    pub count: i64,
}

/// All days of one event type inside a timeframe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct EventSeries {
    pub total: i64,
    pub daily: Vec<DayCount>,
}

/// Folds per-day rows into one series per event type. Rows keep their incoming order
/// inside each series (the query layer returns newest day first).
pub fn aggregate_stats(rows: Vec<DailyStat>) -> BTreeMap<String, EventSeries> {
    let mut out: BTreeMap<String, EventSeries> = BTreeMap::new();
    for row in rows {
        let series = out.entry(row.event_type).or_default();
        series.total += row.count;
        series.daily.push(DayCount { date: row.date, count: row.count });
    }
    out
}
