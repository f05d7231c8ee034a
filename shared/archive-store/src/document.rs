//! Document backend on Redis
//!
//! Key layout under the configured prefix:
//! - `{prefix}:tables` set of table names
//! - `{prefix}:table:{table}:meta` hash with the declared primary key
//! - `{prefix}:table:{table}:ids` set of document ids
//! - `{prefix}:table:{table}:doc:{id}` hash holding one record
//!
//! A document id is the JSON-encoded primary-key tuple, so the id set is the
//! unique compound index: adding an id that is already present is the
//! duplicate-key signal.

use archive_common::{
    union_columns, ArchiveConfig, ArchiveError, ArchiveRecord, CellValue, ReadQuery, RecordBatch,
    Result, StoreBackend, Watermark, WriteMode, WriteReport,
};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

use crate::confirm::ConfirmPrompt;
use crate::{check_key_subset, check_same_key, ArchiveStore};

/// Adds the id and writes the document only when the id was new.
const INSERT_IF_ABSENT: &str = r#"
if redis.call('SADD', KEYS[1], ARGV[1]) == 1 then
    redis.call('HSET', KEYS[2], unpack(ARGV, 2))
    return 1
end
return 0
"#;

/// Writes every field when the id is new or its document is missing,
/// otherwise only the fields after the first `ARGV[2]` key pairs. Returns 1
/// for an insert and 0 for an update.
const UPSERT: &str = r#"
local key_pairs = tonumber(ARGV[2])
if redis.call('SADD', KEYS[1], ARGV[1]) == 1 or redis.call('EXISTS', KEYS[2]) == 0 then
    redis.call('HSET', KEYS[2], unpack(ARGV, 3))
    return 1
end
local first = 3 + 2 * key_pairs
if #ARGV >= first then
    redis.call('HSET', KEYS[2], unpack(ARGV, first))
end
return 0
"#;

const META_PRIMARY_KEY: &str = "primary_key";

pub struct RedisDocumentStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisDocumentStore {
    pub async fn connect(config: &ArchiveConfig) -> Result<Self> {
        Self::connect_url(&config.redis_url, &config.redis_key_prefix).await
    }

    pub async fn connect_url(redis_url: &str, prefix: &str) -> Result<Self> {
        info!("Connecting to Redis document store: {}", redis_url);
        let client = redis::Client::open(redis_url).map_err(|e| {
            ArchiveError::ConfigError(format!("invalid Redis URL {}: {}", redis_url, e))
        })?;
        let conn = ConnectionManager::new(client).await.map_err(redis_err)?;
        info!("Redis document store connected (prefix={})", prefix);
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
        })
    }

    fn tables_key(&self) -> String {
        format!("{}:tables", self.prefix)
    }

    fn meta_key(&self, table: &str) -> String {
        format!("{}:table:{}:meta", self.prefix, table)
    }

    fn ids_key(&self, table: &str) -> String {
        format!("{}:table:{}:ids", self.prefix, table)
    }

    fn doc_key(&self, table: &str, id: &str) -> String {
        format!("{}:table:{}:doc:{}", self.prefix, table, id)
    }

    async fn require_table(&self, table: &str) -> Result<()> {
        if self.table_exists(table).await? {
            Ok(())
        } else {
            Err(ArchiveError::TableNotFound(table.to_string()))
        }
    }

    async fn document_ids(&self, table: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<String> = conn.smembers(self.ids_key(table)).await.map_err(redis_err)?;
        ids.sort();
        Ok(ids)
    }

    /// Fetch documents by id, in the order given. Ids whose hash is gone are skipped.
    async fn load_documents(&self, table: &str, ids: &[String]) -> Result<Vec<(String, HashMap<String, String>)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for id in ids {
            pipe.hgetall(self.doc_key(table, id));
        }
        let mut conn = self.conn.clone();
        let docs: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await.map_err(redis_err)?;
        Ok(ids
            .iter()
            .cloned()
            .zip(docs)
            .filter(|(_, doc)| !doc.is_empty())
            .collect())
    }

    /// Ids of documents whose `column` equals `value`
    async fn matching_ids(&self, table: &str, column: &str, value: &str) -> Result<Vec<String>> {
        let primary_key = self.primary_key(table).await?;
        if primary_key.len() == 1 && primary_key[0] == column {
            let id = document_id(&[value.to_string()])?;
            let mut conn = self.conn.clone();
            let present: bool = conn
                .sismember(self.ids_key(table), &id)
                .await
                .map_err(redis_err)?;
            return Ok(if present { vec![id] } else { Vec::new() });
        }

        let ids = self.document_ids(table).await?;
        Ok(self
            .load_documents(table, &ids)
            .await?
            .into_iter()
            .filter(|(_, doc)| doc.get(column).map(String::as_str) == Some(value))
            .map(|(id, _)| id)
            .collect())
    }

    async fn upsert_documents(
        &self,
        table: &str,
        primary_key: &[String],
        records: &[ArchiveRecord],
        keys: &[Vec<String>],
    ) -> Result<WriteReport> {
        let ids_key = self.ids_key(table);
        let mut pipe = redis::pipe();
        for (record, key) in records.iter().zip(keys) {
            let id = document_id(key)?;
            let cmd = pipe
                .cmd("EVAL")
                .arg(UPSERT)
                .arg(2)
                .arg(&ids_key)
                .arg(self.doc_key(table, &id))
                .arg(&id)
                .arg(primary_key.len());
            // Key fields first so the script can skip them on update.
            for (column, value) in primary_key.iter().zip(key) {
                cmd.arg(column).arg(value);
            }
            for (column, value) in record.iter() {
                if !primary_key.iter().any(|k| k.as_str() == column) {
                    cmd.arg(column).arg(value);
                }
            }
        }

        let mut conn = self.conn.clone();
        let outcomes: Vec<i64> = pipe.query_async(&mut conn).await.map_err(redis_err)?;
        let inserted = outcomes.iter().filter(|o| **o == 1).count();
        Ok(WriteReport {
            attempted: records.len(),
            inserted,
            updated: outcomes.len() - inserted,
            acknowledged: true,
            ..Default::default()
        })
    }

    async fn insert_unacknowledged(
        &self,
        table: &str,
        records: &[ArchiveRecord],
        keys: &[Vec<String>],
    ) -> Result<WriteReport> {
        let ids_key = self.ids_key(table);
        let mut pipe = redis::pipe();
        for (record, key) in records.iter().zip(keys) {
            let id = document_id(key)?;
            let cmd = pipe
                .cmd("EVAL")
                .arg(INSERT_IF_ABSENT)
                .arg(2)
                .arg(&ids_key)
                .arg(self.doc_key(table, &id))
                .arg(&id);
            for (column, value) in record.iter() {
                cmd.arg(column).arg(value);
            }
            cmd.ignore();
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await.map_err(redis_err)?;

        Ok(WriteReport {
            attempted: records.len(),
            acknowledged: false,
            ..Default::default()
        })
    }
}

#[async_trait]
impl ArchiveStore for RedisDocumentStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Document
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        conn.sismember(self.tables_key(), table).await.map_err(redis_err)
    }

    async fn create_table(&self, table: &str, columns: &[String], primary_key: &[String]) -> Result<()> {
        if self.table_exists(table).await? {
            return Err(ArchiveError::TableExists(table.to_string()));
        }
        check_key_subset(table, columns, primary_key)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(self.meta_key(table), META_PRIMARY_KEY, serde_json::to_string(primary_key)?)
            .ignore()
            .sadd(self.tables_key(), table)
            .ignore();
        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await.map_err(redis_err)?;

        info!("Created collection {} with unique index {:?}", table, primary_key);
        Ok(())
    }

    async fn primary_key(&self, table: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .hget(self.meta_key(table), META_PRIMARY_KEY)
            .await
            .map_err(redis_err)?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(ArchiveError::TableNotFound(table.to_string())),
        }
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

        let keys = records
            .iter()
            .map(|r| r.key_tuple(table, primary_key))
            .collect::<Result<Vec<_>>>()?;

        // Document ids follow the declared key order, whatever order the caller used.
        let (primary_key, keys) = if self.table_exists(table).await? {
            let declared = self.primary_key(table).await?;
            check_same_key(table, &declared, primary_key)?;
            if declared.as_slice() == primary_key {
                (declared, keys)
            } else {
                let keys = records
                    .iter()
                    .map(|r| r.key_tuple(table, &declared))
                    .collect::<Result<Vec<_>>>()?;
                (declared, keys)
            }
        } else {
            self.create_table(table, &union_columns(records), primary_key).await?;
            (primary_key.to_vec(), keys)
        };

        let report = match mode {
            WriteMode::InsertOrUpdate => self.upsert_documents(table, &primary_key, records, &keys).await?,
            WriteMode::InsertIgnoreDuplicates => self.insert_unacknowledged(table, records, &keys).await?,
        };

        if report.acknowledged {
            info!(
                "Wrote {} documents to {}: inserted={}, updated={}",
                report.attempted, table, report.inserted, report.updated
            );
        } else {
            info!(
                "Sent {} documents to {} (duplicates dropped by the index, unacknowledged)",
                report.attempted, table
            );
        }
        Ok(report)
    }

    async fn read(&self, query: &ReadQuery) -> Result<RecordBatch> {
        let (table, ids) = match query {
            ReadQuery::Table(table) => {
                self.require_table(table).await?;
                (table, self.document_ids(table).await?)
            }
            ReadQuery::Filter { table, column, value } => {
                self.require_table(table).await?;
                (table, self.matching_ids(table, column, value).await?)
            }
            ReadQuery::Sql(_) => {
                return Err(ArchiveError::Unsupported(
                    "SQL queries are not available on the document backend".to_string(),
                ))
            }
        };

        let docs = self.load_documents(table, &ids).await?;
        let records: Vec<ArchiveRecord> = docs.into_iter().map(|(_, doc)| doc.into_iter().collect()).collect();
        let columns = union_columns(&records);
        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|c| match record.get(c) {
                        Some(v) => CellValue::Text(v.to_string()),
                        None => CellValue::Null,
                    })
                    .collect()
            })
            .collect();

        debug!("Read {} documents from {}", records.len(), table);
        Ok(RecordBatch::new(columns, rows))
    }

    async fn count_where(&self, table: &str, column: &str, value: &str) -> Result<u64> {
        self.require_table(table).await?;
        Ok(self.matching_ids(table, column, value).await?.len() as u64)
    }

    async fn delete_where(&self, table: &str, column: &str, value: &str) -> Result<u64> {
        self.require_table(table).await?;
        let ids = self.matching_ids(table, column, value).await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for id in &ids {
            pipe.del(self.doc_key(table, id)).ignore();
            pipe.srem(self.ids_key(table), id).ignore();
        }
        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await.map_err(redis_err)?;

        debug!("Deleted {} documents from {} where {} = {}", ids.len(), table, column, value);
        Ok(ids.len() as u64)
    }

    async fn watermark(&self, table: &str, column: &str) -> Result<Option<Watermark>> {
        if !self.table_exists(table).await? {
            return Ok(None);
        }
        let ids = self.document_ids(table).await?;
        if ids.is_empty() {
            return Ok(None);
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hget(self.doc_key(table, id), column);
        }
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = pipe.query_async(&mut conn).await.map_err(redis_err)?;

        Ok(values
            .into_iter()
            .flatten()
            .filter_map(|v| v.parse::<u64>().ok())
            .max()
            .map(|value| Watermark {
                table: table.to_string(),
                column: column.to_string(),
                value,
            }))
    }

    async fn delete_table(&self, table: &str, prompt: &dyn ConfirmPrompt) -> Result<bool> {
        self.require_table(table).await?;
        if !prompt.confirm(&format!("Drop collection {} under {}?", table, self.prefix)) {
            info!("Drop of collection {} not confirmed, nothing changed", table);
            return Ok(false);
        }

        let ids = self.document_ids(table).await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for id in &ids {
            pipe.del(self.doc_key(table, id)).ignore();
        }
        pipe.del(self.ids_key(table))
            .ignore()
            .del(self.meta_key(table))
            .ignore()
            .srem(self.tables_key(), table)
            .ignore();
        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await.map_err(redis_err)?;

        warn!("Dropped collection {} ({} documents)", table, ids.len());
        Ok(true)
    }
}

fn redis_err(err: redis::RedisError) -> ArchiveError {
    ArchiveError::StorageError(format!("redis: {}", err))
}

/// Document id derived from the primary-key tuple
pub(crate) fn document_id(key: &[String]) -> Result<String> {
    Ok(serde_json::to_string(key)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_distinguishes_tuples() {
        let a = document_id(&["1".to_string(), "23".to_string()]).unwrap();
        let b = document_id(&["12".to_string(), "3".to_string()]).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, r#"["1","23"]"#);
    }

    #[test]
    fn test_upsert_script_repairs_missing_documents() {
        assert!(UPSERT.contains("EXISTS"));
        assert!(UPSERT.contains("unpack(ARGV, first)"));
    }

    #[test]
    fn test_insert_script_guards_on_sadd() {
        assert!(INSERT_IF_ABSENT.contains("SADD"));
        assert!(INSERT_IF_ABSENT.contains("unpack(ARGV, 2)"));
    }
}
