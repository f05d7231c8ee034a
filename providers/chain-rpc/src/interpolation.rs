//! Block timestamps by linear interpolation
//!
//! Only the lowest and highest block of a set are queried; every block in
//! between is placed on the straight line through those two anchors.
//! Anchors whose timestamps run backwards give a flat line at the lower
//! anchor's timestamp.

use archive_common::{ArchiveError, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::ChainClient;

/// Seconds timestamp of `block` on the line through `lo` and `hi`.
pub fn interpolate(lo: (u64, i64), hi: (u64, i64), block: u64) -> i64 {
    let (lo_block, lo_ts) = lo;
    let (hi_block, hi_ts) = hi;
    if hi_block <= lo_block || block <= lo_block {
        return lo_ts;
    }
    let block = block.min(hi_block);
    let rise = i128::from((hi_ts - lo_ts).max(0));
    let run = i128::from(hi_block - lo_block);
    let offset = i128::from(block - lo_block) * rise / run;
    lo_ts + offset as i64
}

/// Timestamps for every distinct block in `blocks`, keyed by block number.
pub async fn block_timestamps(
    chain: &dyn ChainClient,
    blocks: &[u64],
) -> Result<BTreeMap<u64, DateTime<Utc>>> {
    let (Some(&min), Some(&max)) = (blocks.iter().min(), blocks.iter().max()) else {
        return Ok(BTreeMap::new());
    };

    let lo_ts = chain.get_block_timestamp(min).await?;
    if min == max {
        return Ok(BTreeMap::from([(min, lo_ts)]));
    }
    let hi_ts = chain.get_block_timestamp(max).await?;

    let lo = (min, lo_ts.timestamp());
    let hi = (max, hi_ts.timestamp());

    let mut out = BTreeMap::new();
    for &block in blocks {
        if out.contains_key(&block) {
            continue;
        }
        let ts = match block {
            b if b == min => lo_ts,
            b if b == max => hi_ts,
            b => from_seconds(interpolate(lo, hi, b))?,
        };
        out.insert(block, ts);
    }
    Ok(out)
}

fn from_seconds(seconds: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| ArchiveError::InternalError(format!("timestamp out of range: {}", seconds)))
}
