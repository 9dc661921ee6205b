//! Time windows and block lookups
//!
//! Historical subgraph reads are pinned to block numbers, so every window
//! boundary is first mapped to the first block mined after it.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use eyre::{eyre, Result};
use std::sync::Arc;
use tracing::debug;

use crate::indexer::types::{BlocksBatchResponse, BlocksResponse};
use crate::indexer::{self, queries, Subgraph};

pub const DAY: i64 = 86_400;
pub const WEEK: i64 = 7 * DAY;
/// 30 days; series built with this period follow calendar months instead
pub const MONTH: i64 = 30 * DAY;

/// Midnight UTC of the day containing `timestamp`
pub fn start_of_utc_day(timestamp: i64) -> i64 {
    timestamp - timestamp.rem_euclid(DAY)
}

/// Midnight UTC today
pub fn latest_utc_date() -> i64 {
    start_of_utc_day(Utc::now().timestamp())
}

/// Whole or partial periods covering `[start, end]`
pub fn num_periods(start: i64, end: i64, period: i64) -> u64 {
    if period <= 0 || end < start {
        return 0;
    }
    let interval = end - start + 1;
    ((interval + period - 1) / period) as u64
}

fn days_in_month(timestamp: i64) -> Option<i64> {
    let date = DateTime::<Utc>::from_timestamp(timestamp, 0)?.date_naive();
    let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?;
    let next = if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)?
    };
    Some((next - first).num_days())
}

/// Timestamps from `start` through `end`, one per period. A `MONTH` period
/// steps by the length of each calendar month.
pub fn time_series(start: i64, end: i64, period: i64) -> Vec<i64> {
    if period == MONTH {
        let mut series = Vec::new();
        let mut current = start;
        while current <= end {
            series.push(current);
            match days_in_month(current) {
                Some(days) => current += days * DAY,
                None => break,
            }
        }
        return series;
    }

    (0..num_periods(start, end, period))
        .map(|p| start + p as i64 * period)
        .collect()
}

/// "Jan 5" style labels in UTC
pub fn readable(timestamps: &[i64]) -> Vec<String> {
    timestamps
        .iter()
        .map(|ts| {
            DateTime::<Utc>::from_timestamp(*ts, 0)
                .map(|d| d.format("%b %-d").to_string())
                .unwrap_or_default()
        })
        .collect()
}

// ============================================
// BLOCK LOOKUPS
// ============================================

#[async_trait]
pub trait BlockSource: Send + Sync {
    /// First block after `timestamp`
    async fn block_at(&self, timestamp: i64) -> Result<u64>;

    /// First block after each timestamp, in input order
    async fn blocks_at(&self, timestamps: &[i64]) -> Result<Vec<u64>>;
}

/// Block lookups against a blocks subgraph
pub struct SubgraphBlocks {
    subgraph: Arc<dyn Subgraph>,
}

impl SubgraphBlocks {
    pub fn new(subgraph: Arc<dyn Subgraph>) -> Self {
        Self { subgraph }
    }
}

#[async_trait]
impl BlockSource for SubgraphBlocks {
    async fn block_at(&self, timestamp: i64) -> Result<u64> {
        let response: BlocksResponse = indexer::query(self.subgraph.as_ref(), &queries::block_at(timestamp)).await?;
        response
            .blocks
            .first()
            .map(|b| b.number)
            .ok_or_else(|| eyre!("No block found after {}", timestamp))
    }

    async fn blocks_at(&self, timestamps: &[i64]) -> Result<Vec<u64>> {
        let mut blocks = Vec::with_capacity(timestamps.len());

        for (batch, chunk) in timestamps.chunks(queries::BLOCK_BATCH_SIZE).enumerate() {
            let offset = batch * queries::BLOCK_BATCH_SIZE;
            let response: BlocksBatchResponse =
                indexer::query(self.subgraph.as_ref(), &queries::blocks_batch(offset, chunk)).await?;

            for (i, timestamp) in chunk.iter().enumerate() {
                let number = response
                    .get(&format!("t{}", offset + i))
                    .and_then(|found| found.first())
                    .map(|b| b.number)
                    .ok_or_else(|| eyre!("No block found after {}", timestamp))?;
                blocks.push(number);
            }
            debug!("Resolved {} block(s) from offset {}", chunk.len(), offset);
        }

        Ok(blocks)
    }
}

/// Timestamps from `start` to today and the block at each
pub async fn custom_time_series(blocks: &dyn BlockSource, start: i64, period: i64) -> Result<(Vec<i64>, Vec<u64>)> {
    let timestamps = time_series(start, latest_utc_date(), period);
    let numbers = blocks.blocks_at(&timestamps).await?;
    Ok((timestamps, numbers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::mock::CannedSubgraph;
    use serde_json::json;

    // 2024-01-01T00:00:00Z
    const JAN_1_2024: i64 = 1_704_067_200;

    #[test]
    fn test_start_of_day() {
        assert_eq!(start_of_utc_day(JAN_1_2024 + 3_600), JAN_1_2024);
        assert_eq!(start_of_utc_day(JAN_1_2024), JAN_1_2024);
    }

    #[test]
    fn test_num_periods() {
        assert_eq!(num_periods(0, DAY - 1, DAY), 1);
        assert_eq!(num_periods(0, DAY, DAY), 2);
        assert_eq!(num_periods(10, 0, DAY), 0);
    }

    #[test]
    fn test_daily_series() {
        let series = time_series(JAN_1_2024, JAN_1_2024 + 2 * DAY, DAY);
        assert_eq!(series, vec![JAN_1_2024, JAN_1_2024 + DAY, JAN_1_2024 + 2 * DAY]);
    }

    #[test]
    fn test_monthly_series_follows_calendar() {
        let end = JAN_1_2024 + 100 * DAY;
        let series = time_series(JAN_1_2024, end, MONTH);
        // Jan 31, leap Feb 29, Mar 31
        assert_eq!(
            series,
            vec![JAN_1_2024, JAN_1_2024 + 31 * DAY, JAN_1_2024 + 60 * DAY, JAN_1_2024 + 91 * DAY]
        );
        assert_eq!(readable(&series), vec!["Jan 1", "Feb 1", "Mar 1", "Apr 1"]);
    }

    #[tokio::test]
    async fn test_block_lookup() {
        let subgraph = CannedSubgraph::new(vec![(
            "blocks(",
            Ok(json!({ "blocks": [{ "id": "0xabc", "number": "19000000", "timestamp": "1704067212" }] })),
        )]);
        let blocks = SubgraphBlocks::new(Arc::new(subgraph));
        assert_eq!(blocks.block_at(JAN_1_2024).await.unwrap(), 19_000_000);
    }

    #[tokio::test]
    async fn test_missing_block_is_an_error() {
        let subgraph = CannedSubgraph::new(vec![("blocks(", Ok(json!({ "blocks": [] })))]);
        let blocks = SubgraphBlocks::new(Arc::new(subgraph));
        assert!(blocks.block_at(JAN_1_2024).await.is_err());
    }

    #[tokio::test]
    async fn test_batched_lookup_splits_at_batch_size() {
        let mut data = serde_json::Map::new();
        for i in 0..150 {
            data.insert(format!("t{}", i), json!([{ "number": 1000 + i }]));
        }
        let subgraph = Arc::new(CannedSubgraph::new(vec![("GetBlocks", Ok(serde_json::Value::Object(data)))]));
        let blocks = SubgraphBlocks::new(subgraph.clone());

        let timestamps: Vec<i64> = (0..150).map(|i| JAN_1_2024 + i * DAY).collect();
        let numbers = blocks.blocks_at(&timestamps).await.unwrap();

        assert_eq!(numbers.len(), 150);
        assert_eq!(numbers[0], 1000);
        assert_eq!(numbers[149], 1149);
        assert_eq!(subgraph.queries().len(), 2);
        assert!(subgraph.queries()[1].contains("t100:"));
    }
}
