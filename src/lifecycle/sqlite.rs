//! SQLite lifecycle store

use super::traits::{LifecycleError, LifecycleResult, LifecycleStore};
use super::types::{DocumentId, DocumentRecord, DocumentStatus, NewDocument, RequestRecord, UsageRecord};
use crate::llm::CompletionUsage;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

const SELECT_COLUMNS: &str =
    "SELECT id, filename, filepath, fingerprint, status, partition_key, created_at, updated_at FROM documents";

const SELECT_REQUESTS: &str = "SELECT id, req_id, content, req_type, scenario, created_at FROM request_seq";

const SELECT_USAGE: &str =
    "SELECT id, req_id, req_type, prompt_tokens, completion_tokens, scenario, created_at FROM request_token";

/// SQLite-backed lifecycle store.
///
/// The `CHECK` constraint on `documents` mirrors the fingerprint invariant,
/// so a write that would break it fails inside the transaction and rolls back.
pub struct SqliteLifecycleStore {
    conn: Mutex<Connection>,
}

/// Raw row before status/date parsing
type RawRow = (DocumentId, String, String, Option<String>, String, Option<String>, String, String);

impl SqliteLifecycleStore {
    fn init_schema(conn: &Connection) -> LifecycleResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                filepath TEXT NOT NULL,
                fingerprint TEXT,
                status TEXT NOT NULL
                    CHECK (status IN ('New', 'Modified', 'Persistent', 'Deleted')),
                partition_key TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                CHECK ((status = 'Persistent') = (fingerprint IS NOT NULL))
            );

            CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
            CREATE INDEX IF NOT EXISTS idx_documents_filename ON documents(filename);

            CREATE TABLE IF NOT EXISTS request_seq (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                req_id TEXT NOT NULL UNIQUE,
                content TEXT NOT NULL,
                req_type TEXT NOT NULL,
                scenario TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS request_token (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                req_id TEXT NOT NULL REFERENCES request_seq(req_id),
                req_type TEXT NOT NULL,
                prompt_tokens INTEGER NOT NULL,
                completion_tokens INTEGER NOT NULL,
                scenario TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_request_token_req_id ON request_token(req_id);

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    /// Open or create a lifecycle database at the given path
    pub fn open(path: impl AsRef<Path>) -> LifecycleResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> LifecycleResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
        ))
    }

    fn parse_date(value: &str) -> LifecycleResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| LifecycleError::CorruptRow(format!("bad timestamp '{}': {}", value, e)))
    }

    fn row_to_record(raw: RawRow) -> LifecycleResult<DocumentRecord> {
        let (id, filename, filepath, fingerprint, status, partition_key, created_at, updated_at) = raw;
        Ok(DocumentRecord {
            id,
            filename,
            filepath,
            fingerprint,
            status: status.parse().map_err(LifecycleError::CorruptRow)?,
            partition_key,
            created_at: Self::parse_date(&created_at)?,
            updated_at: Self::parse_date(&updated_at)?,
        })
    }

    fn parse_req_id(value: &str) -> LifecycleResult<Uuid> {
        Uuid::parse_str(value).map_err(|e| LifecycleError::CorruptRow(format!("bad req_id '{}': {}", value, e)))
    }

    fn load_request(conn: &Connection, req_id: Uuid) -> LifecycleResult<Option<RequestRecord>> {
        let raw = conn
            .query_row(
                &format!("{} WHERE req_id = ?1", SELECT_REQUESTS),
                params![req_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        raw.map(Self::request_from_row).transpose()
    }

    fn request_from_row(
        (id, req_id, content, req_type, scenario, created_at): (i64, String, String, String, Option<String>, String),
    ) -> LifecycleResult<RequestRecord> {
        Ok(RequestRecord {
            id,
            req_id: Self::parse_req_id(&req_id)?,
            content,
            req_type,
            scenario,
            created_at: Self::parse_date(&created_at)?,
        })
    }

    fn load(conn: &Connection, id: DocumentId) -> LifecycleResult<Option<DocumentRecord>> {
        let raw = conn
            .query_row(&format!("{} WHERE id = ?1", SELECT_COLUMNS), params![id], Self::read_row)
            .optional()?;
        raw.map(Self::row_to_record).transpose()
    }

    fn query(conn: &Connection, sql: &str, args: &[String]) -> LifecycleResult<Vec<DocumentRecord>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), Self::read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::row_to_record).collect()
    }
}

impl LifecycleStore for SqliteLifecycleStore {
    fn register(&self, document: &NewDocument) -> LifecycleResult<DocumentRecord> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            r#"
            INSERT INTO documents (filename, filepath, fingerprint, status, partition_key, created_at, updated_at)
            VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?5)
            "#,
            params![
                document.filename,
                document.filepath,
                DocumentStatus::New.as_str(),
                document.partition_key,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        Self::load(&conn, id)?.ok_or(LifecycleError::DocumentNotFound(id))
    }

    fn get(&self, id: DocumentId) -> LifecycleResult<Option<DocumentRecord>> {
        let conn = self.conn.lock().unwrap();
        Self::load(&conn, id)
    }

    fn list(&self) -> LifecycleResult<Vec<DocumentRecord>> {
        let conn = self.conn.lock().unwrap();
        Self::query(&conn, &format!("{} ORDER BY id", SELECT_COLUMNS), &[])
    }

    fn query_by_status(&self, statuses: &[DocumentStatus]) -> LifecycleResult<Vec<DocumentRecord>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!("{} WHERE status IN ({}) ORDER BY id", SELECT_COLUMNS, placeholders);
        let args: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        Self::query(&conn, &sql, &args)
    }

    fn query_persistent_grouped_by_partition(&self) -> LifecycleResult<BTreeMap<String, Vec<DocumentRecord>>> {
        let persistent = self.query_by_status(&[DocumentStatus::Persistent])?;

        let mut groups: BTreeMap<String, Vec<DocumentRecord>> = BTreeMap::new();
        for doc in persistent {
            if !doc.is_aggregatable() {
                continue;
            }
            let Some(key) = doc.partition().map(str::to_string) else {
                continue;
            };
            groups.entry(key).or_default().push(doc);
        }
        Ok(groups)
    }

    fn update_status_and_fingerprint(
        &self,
        id: DocumentId,
        status: DocumentStatus,
        fingerprint: Option<&str>,
    ) -> LifecycleResult<DocumentRecord> {
        if (status == DocumentStatus::Persistent) != fingerprint.is_some() {
            return Err(LifecycleError::FingerprintInvariant(id));
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let current = Self::load(&tx, id)?.ok_or(LifecycleError::DocumentNotFound(id))?;
        if !current.status.can_transition_to(status) {
            return Err(LifecycleError::InvalidTransition {
                id,
                from: current.status,
                to: status,
            });
        }

        tx.execute(
            "UPDATE documents SET status = ?1, fingerprint = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), fingerprint, Utc::now().to_rfc3339(), id],
        )?;
        let updated = Self::load(&tx, id)?.ok_or(LifecycleError::DocumentNotFound(id))?;
        tx.commit()?;
        Ok(updated)
    }

    fn touch_partition(&self, ids: &[DocumentId]) -> LifecycleResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        for id in ids {
            let rows = tx.execute(
                "UPDATE documents SET updated_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
            if rows == 0 {
                return Err(LifecycleError::DocumentNotFound(*id));
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn record_request(&self, content: &str, req_type: &str, scenario: Option<&str>) -> LifecycleResult<RequestRecord> {
        let conn = self.conn.lock().unwrap();
        let req_id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO request_seq (req_id, content, req_type, scenario, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![req_id.to_string(), content, req_type, scenario, Utc::now().to_rfc3339()],
        )?;
        Self::load_request(&conn, req_id)?.ok_or(LifecycleError::RequestNotFound(req_id))
    }

    fn record_usage(&self, req_id: Uuid, usage: &CompletionUsage) -> LifecycleResult<UsageRecord> {
        let conn = self.conn.lock().unwrap();
        let request = Self::load_request(&conn, req_id)?.ok_or(LifecycleError::RequestNotFound(req_id))?;
        let created_at = Utc::now();
        conn.execute(
            r#"
            INSERT INTO request_token (req_id, req_type, prompt_tokens, completion_tokens, scenario, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                req_id.to_string(),
                request.req_type,
                usage.prompt_tokens as i64,
                usage.completion_tokens as i64,
                request.scenario,
                created_at.to_rfc3339(),
            ],
        )?;
        Ok(UsageRecord {
            id: conn.last_insert_rowid(),
            req_id,
            req_type: request.req_type,
            usage: *usage,
            scenario: request.scenario,
            created_at,
        })
    }

    fn requests(&self) -> LifecycleResult<Vec<RequestRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{} ORDER BY id", SELECT_REQUESTS))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::request_from_row).collect()
    }

    fn usage_for(&self, req_id: Uuid) -> LifecycleResult<Vec<UsageRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{} WHERE req_id = ?1 ORDER BY id", SELECT_USAGE))?;
        let rows = stmt
            .query_map(params![req_id.to_string()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, req_type, prompt_tokens, completion_tokens, scenario, created_at)| {
                Ok(UsageRecord {
                    id,
                    req_id,
                    req_type,
                    usage: CompletionUsage::new(prompt_tokens as u64, completion_tokens as u64),
                    scenario,
                    created_at: Self::parse_date(&created_at)?,
                })
            })
            .collect()
    }
}
