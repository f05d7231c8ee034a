//! Record-level hooks run after flattening and before persistence

use alloy_primitives::U256;
use archive_common::{ArchiveError, ArchiveRecord, Result};
use tracing::warn;

pub trait PostProcessor: Send + Sync {
    fn apply(&self, records: Vec<ArchiveRecord>) -> Result<Vec<ArchiveRecord>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl PostProcessor for Identity {
    fn apply(&self, records: Vec<ArchiveRecord>) -> Result<Vec<ArchiveRecord>> {
        Ok(records)
    }
}

/// Removes columns that carry nothing for the table, e.g. the contract
/// address of a single-contract stream.
#[derive(Debug, Clone)]
pub struct DropColumns(pub Vec<String>);

impl DropColumns {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self(columns.into_iter().map(Into::into).collect())
    }
}

impl PostProcessor for DropColumns {
    fn apply(&self, mut records: Vec<ArchiveRecord>) -> Result<Vec<ArchiveRecord>> {
        for record in &mut records {
            for column in &self.0 {
                record.remove(column);
            }
        }
        Ok(records)
    }
}

/// Collapses Uniswap V2 `Swap` in/out pairs into signed net amounts:
/// `amount0 = amount0In - amount0Out` and likewise for token 1, seen from
/// the pool. A record whose amounts do not parse is dropped on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwapNetAmounts;

const SWAP_LEGS: [(&str, &str, &str); 2] = [
    ("amount0", "args_amount0In", "args_amount0Out"),
    ("amount1", "args_amount1In", "args_amount1Out"),
];

impl PostProcessor for SwapNetAmounts {
    fn apply(&self, records: Vec<ArchiveRecord>) -> Result<Vec<ArchiveRecord>> {
        Ok(records
            .into_iter()
            .filter_map(|mut record| match net_amounts(&mut record) {
                Ok(()) => Some(record),
                Err(e) => {
                    warn!(
                        block = record.get("blockNumber").unwrap_or_default(),
                        log_index = record.get("logIndex").unwrap_or_default(),
                        "Dropping swap: {}",
                        e
                    );
                    None
                }
            })
            .collect())
    }
}

fn net_amounts(record: &mut ArchiveRecord) -> Result<()> {
    let mut nets = Vec::with_capacity(SWAP_LEGS.len());
    for (net, amount_in, amount_out) in SWAP_LEGS {
        nets.push((net, signed_difference(parse_amount(record, amount_in)?, parse_amount(record, amount_out)?)));
    }
    for ((net, value), (_, amount_in, amount_out)) in nets.into_iter().zip(SWAP_LEGS) {
        record.insert(net, value);
        record.remove(amount_in);
        record.remove(amount_out);
    }
    Ok(())
}

/// `a - b` in decimal, exact over the whole `uint256` range
fn signed_difference(a: U256, b: U256) -> String {
    if a >= b {
        (a - b).to_string()
    } else {
        format!("-{}", b - a)
    }
}

fn parse_amount(record: &ArchiveRecord, column: &str) -> Result<U256> {
    let text = record
        .get(column)
        .ok_or_else(|| ArchiveError::SchemaError(format!("swap record has no {} column", column)))?;
    U256::from_str_radix(text, 10)
        .map_err(|e| ArchiveError::Decode(format!("{} is not an amount ({}): {}", column, text, e)))
}

/// Runs post-processors in order
#[derive(Default)]
pub struct Pipeline(Vec<Box<dyn PostProcessor>>);

impl Pipeline {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn then(mut self, step: impl PostProcessor + 'static) -> Self {
        self.0.push(Box::new(step));
        self
    }
}

impl PostProcessor for Pipeline {
    fn apply(&self, records: Vec<ArchiveRecord>) -> Result<Vec<ArchiveRecord>> {
        self.0.iter().try_fold(records, |records, step| step.apply(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swap(a0_in: &str, a0_out: &str, a1_in: &str, a1_out: &str) -> ArchiveRecord {
        ArchiveRecord::from([
            ("blockNumber", "1"),
            ("logIndex", "0"),
            ("blockHash", "0x11"),
            ("args_amount0In", a0_in),
            ("args_amount0Out", a0_out),
            ("args_amount1In", a1_in),
            ("args_amount1Out", a1_out),
        ])
    }

    #[test]
    fn test_drop_columns_ignores_absent() {
        let out = DropColumns::new(["blockHash", "address"])
            .apply(vec![swap("0", "0", "0", "0")])
            .unwrap();
        assert!(!out[0].contains("blockHash"));
        assert!(out[0].contains("logIndex"));
    }

    #[test]
    fn test_swap_net_amounts() {
        let out = SwapNetAmounts
            .apply(vec![swap("1000000000000000000000", "0", "0", "2500")])
            .unwrap();
        assert_eq!(out[0].get("amount0"), Some("1000000000000000000000"));
        assert_eq!(out[0].get("amount1"), Some("-2500"));
        assert!(!out[0].contains("args_amount0In"));
        assert!(!out[0].contains("args_amount1Out"));
    }

    #[test]
    fn test_swap_amounts_beyond_signed_range() {
        let max = U256::MAX.to_string();
        let out = SwapNetAmounts
            .apply(vec![swap(&max, "0", "1", &max)])
            .unwrap();
        assert_eq!(out[0].get("amount0"), Some(max.as_str()));
        assert_eq!(
            out[0].get("amount1"),
            Some(format!("-{}", U256::MAX - U256::from(1)).as_str())
        );
    }

    #[test]
    fn test_unparseable_swap_dropped_alone() {
        let mut missing = swap("1", "0", "0", "1");
        missing.remove("args_amount1In");
        let garbage = swap("12abc", "0", "0", "1");
        let out = SwapNetAmounts
            .apply(vec![missing, garbage, swap("7", "2", "0", "0")])
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("amount0"), Some("5"));
    }

    #[test]
    fn test_pipeline_runs_in_order() {
        let pipeline = Pipeline::new()
            .then(SwapNetAmounts)
            .then(DropColumns::new(["blockHash", "amount1"]));
        let out = pipeline.apply(vec![swap("5", "2", "0", "0")]).unwrap();
        assert_eq!(out[0].get("amount0"), Some("3"));
        assert!(!out[0].contains("amount1"));
        assert!(!out[0].contains("blockHash"));
    }
}
