//! Opportunistic re-typing of text columns on read
//!
//! Values are stored as text. On the way out, a column whose every value is
//! `True`/`False` becomes boolean, and a column whose every value is a
//! non-empty run of ASCII digits becomes an arbitrary-precision integer.
//! Anything else stays text. Nulls do not block a conversion.

use archive_common::{CellValue, RecordBatch};
use num_bigint::BigInt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Integer,
    Text,
}

pub fn retype_batch(batch: &mut RecordBatch) {
    for col in 0..batch.columns.len() {
        match column_kind(batch, col) {
            ColumnKind::Text => {}
            kind => {
                for row in batch.rows.iter_mut() {
                    if let Some(cell) = row.get_mut(col) {
                        convert(cell, kind);
                    }
                }
            }
        }
    }
}

fn column_kind(batch: &RecordBatch, col: usize) -> ColumnKind {
    let mut texts = batch
        .rows
        .iter()
        .filter_map(|row| row.get(col))
        .filter(|cell| !matches!(cell, CellValue::Null))
        .peekable();

    // Columns that already carry native types or are entirely null stay put.
    if texts.peek().is_none() {
        return ColumnKind::Text;
    }

    let mut all_bool = true;
    let mut all_digits = true;
    for cell in texts {
        let Some(s) = cell.as_text() else {
            return ColumnKind::Text;
        };
        all_bool &= s == "True" || s == "False";
        all_digits &= !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        if !all_bool && !all_digits {
            return ColumnKind::Text;
        }
    }

    if all_bool {
        ColumnKind::Bool
    } else {
        ColumnKind::Integer
    }
}

fn convert(cell: &mut CellValue, kind: ColumnKind) {
    let CellValue::Text(s) = cell else {
        return;
    };
    let converted = match kind {
        ColumnKind::Bool => Some(CellValue::Bool(s == "True")),
        ColumnKind::Integer => s.parse::<BigInt>().ok().map(CellValue::Integer),
        ColumnKind::Text => None,
    };
    if let Some(value) = converted {
        *cell = value;
    }
}
