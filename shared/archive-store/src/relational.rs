//! Relational backend on DuckDB
//!
//! Every column is `TEXT` and each table carries a composite `PRIMARY KEY`.
//! `InsertOrUpdate` replaces the whole row of an existing key;
//! `InsertIgnoreDuplicates` keeps the stored row. Reads are re-typed through
//! [`crate::retype`].

use archive_common::{
    union_columns, ArchiveConfig, ArchiveError, ArchiveRecord, CellValue, ReadQuery, RecordBatch,
    Result, StoreBackend, Watermark, WriteMode, WriteReport,
};
use async_trait::async_trait;
use duckdb::types::Value;
use duckdb::{params_from_iter, Connection};
use num_bigint::BigInt;
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

use crate::confirm::ConfirmPrompt;
use crate::retype::retype_batch;
use crate::{check_key_subset, check_same_key, ArchiveStore};

pub struct DuckDbStore {
    conn: Mutex<Connection>,
    path: String,
    /// Re-type text columns on read
    parse_str_columns: bool,
}

impl DuckDbStore {
    /// Open the database named in the configuration and apply its settings
    pub fn open(config: &ArchiveConfig) -> Result<Self> {
        let conn = if config.is_in_memory() {
            Connection::open_in_memory()
        } else {
            Connection::open(&config.duckdb_path)
        }
        .map_err(|e| {
            warn!("Failed to open DuckDB at {}: {}", config.duckdb_path, e);
            ArchiveError::StorageError(format!("failed to open {}: {}", config.duckdb_path, e))
        })?;

        conn.execute_batch(&format!(
            "SET memory_limit = '{}MB'; SET threads = {};",
            config.duckdb_memory_limit_mb, config.duckdb_threads
        ))
        .map_err(storage_err)?;

        info!(
            "DuckDB archive opened at {} (memory_limit={}MB, threads={})",
            config.duckdb_path, config.duckdb_memory_limit_mb, config.duckdb_threads
        );

        Ok(Self {
            conn: Mutex::new(conn),
            path: config.duckdb_path.clone(),
            parse_str_columns: true,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: archive_common::config::IN_MEMORY_PATH.to_string(),
            parse_str_columns: true,
        })
    }

    /// Return stored text as-is on read
    pub fn without_retyping(mut self) -> Self {
        self.parse_str_columns = false;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run raw SQL statements against the archive database
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql).map_err(storage_err)
    }
}

#[async_trait]
impl ArchiveStore for DuckDbStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Relational
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let conn = self.conn.lock();
        table_exists_in(&conn, table)
    }

    async fn create_table(&self, table: &str, columns: &[String], primary_key: &[String]) -> Result<()> {
        let conn = self.conn.lock();
        create_table_in(&conn, table, columns, primary_key)
    }

    async fn primary_key(&self, table: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        require_table(&conn, table)?;
        Ok(table_info(&conn, table)?
            .into_iter()
            .filter(|(_, pk)| *pk)
            .map(|(name, _)| name)
            .collect())
    }

    #[instrument(skip(self, records), fields(table = %table, records = records.len(), mode = %mode))]
    async fn write(
        &self,
        records: &[ArchiveRecord],
        table: &str,
        primary_key: &[String],
        mode: WriteMode,
    ) -> Result<WriteReport> {
        if records.is_empty() {
            return Ok(WriteReport {
                acknowledged: true,
                ..Default::default()
            });
        }

        // Reject the whole batch before touching the table.
        let keys = records
            .iter()
            .map(|r| r.key_tuple(table, primary_key))
            .collect::<Result<Vec<_>>>()?;

        let mut conn = self.conn.lock();
        let columns = union_columns(records);

        if table_exists_in(&conn, table)? {
            let info = table_info(&conn, table)?;
            let declared: Vec<String> = info.iter().filter(|(_, pk)| *pk).map(|(n, _)| n.clone()).collect();
            check_same_key(table, &declared, primary_key)?;

            let known: HashSet<&str> = info.iter().map(|(n, _)| n.as_str()).collect();
            let unknown: Vec<&String> = columns.iter().filter(|c| !known.contains(c.as_str())).collect();
            if !unknown.is_empty() {
                return Err(ArchiveError::SchemaError(format!(
                    "table {} has no columns {:?}",
                    table, unknown
                )));
            }
        } else {
            create_table_in(&conn, table, &columns, primary_key)?;
        }

        let report = match mode {
            WriteMode::InsertOrUpdate => upsert_rows(&conn, table, primary_key, records, &keys)?,
            WriteMode::InsertIgnoreDuplicates => {
                insert_ignore_rows(&mut conn, table, primary_key, records, &keys)?
            }
        };

        info!(
            "Wrote {} records to {}: inserted={}, updated={}, ignored={}",
            report.attempted, table, report.inserted, report.updated, report.ignored
        );
        Ok(report)
    }

    async fn read(&self, query: &ReadQuery) -> Result<RecordBatch> {
        let (sql, params) = match query {
            ReadQuery::Table(table) => (format!("SELECT * FROM {}", quote_ident(table)), Vec::new()),
            ReadQuery::Filter { table, column, value } => (
                format!(
                    "SELECT * FROM {} WHERE {} = ?",
                    quote_ident(table),
                    quote_ident(column)
                ),
                vec![value.clone()],
            ),
            ReadQuery::Sql(sql) => (sql.clone(), Vec::new()),
        };

        let conn = self.conn.lock();
        if let ReadQuery::Table(table) | ReadQuery::Filter { table, .. } = query {
            require_table(&conn, table)?;
        }

        debug!("Executing read: {}", sql);
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let mut rows = stmt.query(params_from_iter(params.iter())).map_err(storage_err)?;
        let columns: Vec<String> = rows.as_ref().map(|s| s.column_names()).unwrap_or_default();

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(storage_err)? {
            let mut cells = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                let value: Value = row.get(idx).map_err(storage_err)?;
                cells.push(cell_from_value(value));
            }
            out.push(cells);
        }

        let mut batch = RecordBatch::new(columns, out);
        if self.parse_str_columns {
            retype_batch(&mut batch);
        }
        Ok(batch)
    }

    async fn count_where(&self, table: &str, column: &str, value: &str) -> Result<u64> {
        let conn = self.conn.lock();
        require_table(&conn, table)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?",
            quote_ident(table),
            quote_ident(column)
        );
        let count: i64 = conn
            .query_row(&sql, [value], |row| row.get(0))
            .map_err(storage_err)?;
        Ok(count.max(0) as u64)
    }

    async fn delete_where(&self, table: &str, column: &str, value: &str) -> Result<u64> {
        let conn = self.conn.lock();
        require_table(&conn, table)?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(table),
            quote_ident(column)
        );
        let deleted = conn.execute(&sql, [value]).map_err(storage_err)?;
        debug!("Deleted {} rows from {} where {} = {}", deleted, table, column, value);
        Ok(deleted as u64)
    }

    async fn watermark(&self, table: &str, column: &str) -> Result<Option<Watermark>> {
        let conn = self.conn.lock();
        if !table_exists_in(&conn, table)? {
            return Ok(None);
        }
        // Stored as text, so compare numerically rather than lexically.
        let sql = format!(
            "SELECT MAX(TRY_CAST({} AS UBIGINT)) FROM {}",
            quote_ident(column),
            quote_ident(table)
        );
        let max: Option<u64> = conn.query_row(&sql, [], |row| row.get(0)).map_err(storage_err)?;
        Ok(max.map(|value| Watermark {
            table: table.to_string(),
            column: column.to_string(),
            value,
        }))
    }

    async fn delete_table(&self, table: &str, prompt: &dyn ConfirmPrompt) -> Result<bool> {
        if !self.table_exists(table).await? {
            return Err(ArchiveError::TableNotFound(table.to_string()));
        }
        if !prompt.confirm(&format!("Drop table {} from {}?", table, self.path)) {
            info!("Drop of table {} not confirmed, nothing changed", table);
            return Ok(false);
        }
        let conn = self.conn.lock();
        conn.execute_batch(&format!("DROP TABLE {}", quote_ident(table)))
            .map_err(storage_err)?;
        warn!("Dropped table {}", table);
        Ok(true)
    }
}

fn storage_err(err: duckdb::Error) -> ArchiveError {
    ArchiveError::StorageError(err.to_string())
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn table_exists_in(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
            [table],
            |row| row.get(0),
        )
        .map_err(storage_err)?;
    Ok(count > 0)
}

fn require_table(conn: &Connection, table: &str) -> Result<()> {
    if table_exists_in(conn, table)? {
        Ok(())
    } else {
        Err(ArchiveError::TableNotFound(table.to_string()))
    }
}

/// Column names with their primary-key flag, in declaration order
fn table_info(conn: &Connection, table: &str) -> Result<Vec<(String, bool)>> {
    let sql = format!(
        "SELECT name, pk FROM pragma_table_info('{}')",
        table.replace('\'', "''")
    );
    let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)))
        .map_err(storage_err)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(storage_err)
}

fn create_table_in(conn: &Connection, table: &str, columns: &[String], primary_key: &[String]) -> Result<()> {
    if table_exists_in(conn, table)? {
        return Err(ArchiveError::TableExists(table.to_string()));
    }
    check_key_subset(table, columns, primary_key)?;

    let column_defs = columns
        .iter()
        .map(|c| format!("{} TEXT", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let key = primary_key
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    conn.execute_batch(&format!(
        "CREATE TABLE {} ({}, PRIMARY KEY ({}))",
        quote_ident(table),
        column_defs,
        key
    ))
    .map_err(storage_err)?;

    info!("Created table {} with primary key {:?}", table, primary_key);
    Ok(())
}

fn key_probe_sql(table: &str, primary_key: &[String]) -> String {
    let predicate = primary_key
        .iter()
        .map(|c| format!("{} = ?", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!("SELECT COUNT(*) FROM {} WHERE {}", quote_ident(table), predicate)
}

fn insert_sql(verb: &str, table: &str, record: &ArchiveRecord) -> String {
    let columns = record.columns().map(quote_ident).collect::<Vec<_>>().join(", ");
    let placeholders = vec!["?"; record.len()].join(", ");
    format!(
        "{} INTO {} ({}) VALUES ({})",
        verb,
        quote_ident(table),
        columns,
        placeholders
    )
}

fn key_exists(conn: &Connection, probe: &str, key: &[String]) -> Result<bool> {
    let count: i64 = conn
        .query_row(probe, params_from_iter(key.iter()), |row| row.get(0))
        .map_err(storage_err)?;
    Ok(count > 0)
}

fn upsert_rows(
    conn: &Connection,
    table: &str,
    primary_key: &[String],
    records: &[ArchiveRecord],
    keys: &[Vec<String>],
) -> Result<WriteReport> {
    let probe = key_probe_sql(table, primary_key);
    let mut report = WriteReport {
        attempted: records.len(),
        acknowledged: true,
        ..Default::default()
    };

    // One statement per record so that a key repeated inside the batch is
    // replaced rather than rejected.
    for (record, key) in records.iter().zip(keys) {
        let existed = key_exists(conn, &probe, key)?;
        conn.execute(
            &insert_sql("INSERT OR REPLACE", table, record),
            params_from_iter(record.iter().map(|(_, v)| v)),
        )
        .map_err(storage_err)?;
        if existed {
            report.updated += 1;
        } else {
            report.inserted += 1;
        }
    }
    Ok(report)
}

fn insert_ignore_rows(
    conn: &mut Connection,
    table: &str,
    primary_key: &[String],
    records: &[ArchiveRecord],
    keys: &[Vec<String>],
) -> Result<WriteReport> {
    let probe = key_probe_sql(table, primary_key);
    let mut report = WriteReport {
        attempted: records.len(),
        acknowledged: true,
        ..Default::default()
    };
    let mut seen: HashSet<&[String]> = HashSet::new();

    let tx = conn.transaction().map_err(storage_err)?;
    for (record, key) in records.iter().zip(keys) {
        if !seen.insert(key.as_slice()) || key_exists(&tx, &probe, key)? {
            report.ignored += 1;
            continue;
        }
        tx.execute(
            &insert_sql("INSERT OR IGNORE", table, record),
            params_from_iter(record.iter().map(|(_, v)| v)),
        )
        .map_err(storage_err)?;
        report.inserted += 1;
    }
    tx.commit().map_err(storage_err)?;
    Ok(report)
}

fn cell_from_value(value: Value) -> CellValue {
    match value {
        Value::Null => CellValue::Null,
        Value::Boolean(b) => CellValue::Bool(b),
        Value::TinyInt(i) => CellValue::Integer(BigInt::from(i)),
        Value::SmallInt(i) => CellValue::Integer(BigInt::from(i)),
        Value::Int(i) => CellValue::Integer(BigInt::from(i)),
        Value::BigInt(i) => CellValue::Integer(BigInt::from(i)),
        Value::HugeInt(i) => CellValue::Integer(BigInt::from(i)),
        Value::UTinyInt(i) => CellValue::Integer(BigInt::from(i)),
        Value::USmallInt(i) => CellValue::Integer(BigInt::from(i)),
        Value::UInt(i) => CellValue::Integer(BigInt::from(i)),
        Value::UBigInt(i) => CellValue::Integer(BigInt::from(i)),
        Value::Float(f) => CellValue::Text(f.to_string()),
        Value::Double(f) => CellValue::Text(f.to_string()),
        Value::Text(s) => CellValue::Text(s),
        other => CellValue::Text(format!("{:?}", other)),
    }
}
