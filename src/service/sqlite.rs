//! SQLite backend for pastes and access tokens.
//!
//! Each record is kept as a JSON document next to the few columns that
//! listings filter and sort on. Blocking work runs on `spawn_blocking`.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};

use crate::{
    AccessToken, AccessTokenStore, PasteFilter, PasteStore, PasteUpdate, StoreError, StoredPaste,
};

pub const SCHEMA_VERSION: u32 = 2;

pub struct SqlitePasteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePasteStore {
    /// Opens (creating if needed) the database file and brings the schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| StoreError::Task(format!("creating {}: {e}", parent.display())))?;
        }
        let mut conn = Connection::open(path)?;
        migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_memory() -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory()?;
        migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Task(format!("connection mutex poisoned: {e}")))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn migrate(conn: &mut Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current >= SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for version in (current + 1)..=SCHEMA_VERSION {
        match version {
            1 => tx.execute_batch(
                r#"
                CREATE TABLE pastes (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT,
                    private INTEGER NOT NULL,
                    pinned INTEGER NOT NULL,
                    created_at INTEGER NOT NULL,   -- unix micros, for ordering
                    document TEXT NOT NULL
                );
                CREATE INDEX idx_pastes_owner ON pastes(owner_id, created_at);

                CREATE TABLE access_tokens (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    document TEXT NOT NULL
                );
                CREATE INDEX idx_access_tokens_owner ON access_tokens(owner_id);
                "#,
            )?,
            2 => {
                tx.execute_batch("ALTER TABLE pastes ADD COLUMN deletes_at INTEGER;")?;
                backfill_deletes_at(&tx)?;
            }
            other => return Err(StoreError::Task(format!("unknown schema version {other}"))),
        }
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, chrono::Utc::now().to_rfc3339()],
        )?;
    }
    tx.commit()?;
    log::debug!("sqlite schema migrated from v{current} to v{SCHEMA_VERSION}");
    Ok(())
}

/// Copies each document's deadline into the `deletes_at` column.
fn backfill_deletes_at(tx: &Transaction<'_>) -> Result<(), StoreError> {
    let rows = {
        let mut stmt = tx.prepare("SELECT id, document FROM pastes")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    for (id, document) in rows {
        let paste: StoredPaste = serde_json::from_str(&document)?;
        tx.execute(
            "UPDATE pastes SET deletes_at = ?2 WHERE id = ?1",
            params![id, paste.deletes_at.map(|d| d.timestamp_micros())],
        )?;
    }
    Ok(())
}

fn write_paste(conn: &Connection, paste: &StoredPaste, insert: bool) -> Result<(), StoreError> {
    let document = serde_json::to_string(paste)?;
    let sql = if insert {
        "INSERT INTO pastes (id, owner_id, private, pinned, created_at, document, deletes_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
    } else {
        "UPDATE pastes SET owner_id = ?2, private = ?3, pinned = ?4, created_at = ?5,
             document = ?6, deletes_at = ?7
         WHERE id = ?1"
    };
    conn.execute(
        sql,
        params![
            paste.id,
            paste.owner_id,
            paste.private,
            paste.pinned,
            paste.created_at.timestamp_micros(),
            document,
            paste.deletes_at.map(|d| d.timestamp_micros())
        ],
    )?;
    Ok(())
}

fn read_paste(conn: &Connection, id: &str) -> Result<Option<StoredPaste>, StoreError> {
    let document: Option<String> = conn
        .query_row(
            "SELECT document FROM pastes WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    document
        .map(|doc| serde_json::from_str(&doc).map_err(StoreError::from))
        .transpose()
}

/// WHERE clause and bound values for a filter.
fn filter_clause(filter: &PasteFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(owner_id) = &filter.owner_id {
        values.push(Value::Text(owner_id.clone()));
        clauses.push(format!("owner_id = ?{}", values.len()));
    }
    if let Some(private) = filter.private {
        values.push(Value::Integer(private as i64));
        clauses.push(format!("private = ?{}", values.len()));
    }
    if let Some(pinned) = filter.pinned {
        values.push(Value::Integer(pinned as i64));
        clauses.push(format!("pinned = ?{}", values.len()));
    }
    if let Some(tag) = &filter.tag {
        values.push(Value::Text(tag.clone()));
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM json_each(pastes.document, '$.tags') WHERE json_each.value = ?{})",
            values.len()
        ));
    }
    if let Some(now) = filter.live_at {
        values.push(Value::Integer(now.timestamp_micros()));
        clauses.push(format!(
            "(deletes_at IS NULL OR deletes_at > ?{})",
            values.len()
        ));
    }

    let clause = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (clause, values)
}

#[async_trait]
impl PasteStore for SqlitePasteStore {
    async fn insert_paste(&self, paste: StoredPaste) -> Result<(), StoreError> {
        self.run(move |conn| {
            let exists: Option<String> = conn
                .query_row(
                    "SELECT id FROM pastes WHERE id = ?1",
                    params![paste.id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Err(StoreError::Duplicate(paste.id));
            }
            write_paste(conn, &paste, true)
        })
        .await
    }

    async fn get_paste(&self, id: &str) -> Result<Option<StoredPaste>, StoreError> {
        let id = id.to_string();
        self.run(move |conn| read_paste(conn, &id)).await
    }

    async fn paste_exists(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM pastes WHERE id = ?1", params![id], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn update_paste(&self, id: &str, update: PasteUpdate) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let Some(mut paste) = read_paste(&tx, &id)? else {
                return Ok(false);
            };
            update.apply(&mut paste);
            write_paste(&tx, &paste, false)?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn delete_paste(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            let removed = conn.execute("DELETE FROM pastes WHERE id = ?1", params![id])?;
            Ok(removed > 0)
        })
        .await
    }

    async fn find_pastes(&self, filter: &PasteFilter) -> Result<Vec<StoredPaste>, StoreError> {
        let filter = filter.clone();
        self.run(move |conn| {
            let (clause, mut values) = filter_clause(&filter);
            // SQLite reads a negative LIMIT as "no limit".
            let limit = filter
                .limit
                .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
                .unwrap_or(-1);
            values.push(Value::Integer(limit));
            let limit_idx = values.len();
            values.push(Value::Integer(
                i64::try_from(filter.skip).unwrap_or(i64::MAX),
            ));
            let offset_idx = values.len();

            let sql = format!(
                "SELECT document FROM pastes{clause}
                 ORDER BY created_at DESC, id ASC
                 LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
            );
            let mut stmt = conn.prepare(&sql)?;
            let documents = stmt
                .query_map(params_from_iter(values), |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            documents
                .iter()
                .map(|doc| serde_json::from_str(doc).map_err(StoreError::from))
                .collect()
        })
        .await
    }

    async fn count_pastes(&self, filter: &PasteFilter) -> Result<usize, StoreError> {
        let filter = filter.clone();
        self.run(move |conn| {
            let (clause, values) = filter_clause(&filter);
            let sql = format!("SELECT COUNT(*) FROM pastes{clause}");
            let count: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}

#[async_trait]
impl AccessTokenStore for SqlitePasteStore {
    async fn insert_token(&self, token: AccessToken) -> Result<(), StoreError> {
        self.run(move |conn| {
            let exists: Option<String> = conn
                .query_row(
                    "SELECT id FROM access_tokens WHERE id = ?1",
                    params![token.id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Err(StoreError::Duplicate(token.id));
            }
            conn.execute(
                "INSERT INTO access_tokens (id, owner_id, created_at, document)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    token.id,
                    token.owner_id,
                    token.created_at.timestamp_micros(),
                    serde_json::to_string(&token)?
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_token(&self, id: &str) -> Result<Option<AccessToken>, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            let document: Option<String> = conn
                .query_row(
                    "SELECT document FROM access_tokens WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            document
                .map(|doc| serde_json::from_str(&doc).map_err(StoreError::from))
                .transpose()
        })
        .await
    }

    async fn delete_token(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            let removed = conn.execute("DELETE FROM access_tokens WHERE id = ?1", params![id])?;
            Ok(removed > 0)
        })
        .await
    }

    async fn tokens_for_owner(&self, owner_id: &str) -> Result<Vec<AccessToken>, StoreError> {
        let owner_id = owner_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT document FROM access_tokens WHERE owner_id = ?1 ORDER BY created_at DESC",
            )?;
            let documents = stmt
                .query_map(params![owner_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            documents
                .iter()
                .map(|doc| serde_json::from_str(doc).map_err(StoreError::from))
                .collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExpiresIn, Pasty, Scope, StoredContent};
    use chrono::{DateTime, Duration, Utc};

    fn paste(id: &str, owner: Option<&str>, created_at: DateTime<Utc>) -> StoredPaste {
        StoredPaste {
            id: id.into(),
            title: String::new(),
            created_at,
            expires_in: ExpiresIn::Never,
            deletes_at: None,
            owner_id: owner.map(Into::into),
            private: false,
            pinned: false,
            tags: Vec::new(),
            stars: Vec::new(),
            content: StoredContent::Plain {
                pasties: vec![Pasty {
                    id: "p".into(),
                    title: String::new(),
                    content: "body".into(),
                    language: "Text".into(),
                }],
                history: Vec::new(),
            },
        }
    }

    #[tokio::test]
    async fn stores_and_reads_documents() {
        let store = SqlitePasteStore::open_memory().unwrap();
        let original = paste("abc", Some("u1"), Utc::now());
        store.insert_paste(original.clone()).await.unwrap();

        let loaded = store.get_paste("abc").await.unwrap().unwrap();
        assert_eq!(loaded, original);
        assert!(store.paste_exists("abc").await.unwrap());
        assert!(store.get_paste("missing").await.unwrap().is_none());

        let dup = store.insert_paste(original).await;
        assert!(matches!(dup, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn updates_keep_columns_in_sync() {
        let store = SqlitePasteStore::open_memory().unwrap();
        store
            .insert_paste(paste("abc", Some("u1"), Utc::now()))
            .await
            .unwrap();

        assert!(store
            .update_paste("abc", PasteUpdate::Pinned(true))
            .await
            .unwrap());
        assert!(!store
            .update_paste("zzz", PasteUpdate::Pinned(true))
            .await
            .unwrap());

        let pinned = PasteFilter {
            pinned: Some(true),
            ..PasteFilter::owned_by("u1")
        };
        assert_eq!(store.count_pastes(&pinned).await.unwrap(), 1);
        assert!(store.get_paste("abc").await.unwrap().unwrap().pinned);
    }

    #[tokio::test]
    async fn filters_by_tag_and_pages_newest_first() {
        let store = SqlitePasteStore::open_memory().unwrap();
        let now = Utc::now();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            let mut p = paste(id, Some("u1"), now - Duration::minutes(i as i64));
            if *id != "b" {
                p.tags = vec!["rust".into()];
            }
            store.insert_paste(p).await.unwrap();
        }
        store
            .insert_paste(paste("other", Some("u2"), now))
            .await
            .unwrap();

        let tagged = PasteFilter {
            tag: Some("rust".into()),
            ..PasteFilter::owned_by("u1")
        };
        let ids: Vec<String> = store
            .find_pastes(&tagged)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);

        let second_page = PasteFilter {
            skip: 1,
            limit: Some(1),
            ..PasteFilter::owned_by("u1")
        };
        let found = store.find_pastes(&second_page).await.unwrap();
        assert_eq!(found[0].id, "b");
        assert_eq!(
            store.count_pastes(&PasteFilter::owned_by("u1")).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = SqlitePasteStore::open_memory().unwrap();
        store
            .insert_paste(paste("abc", None, Utc::now()))
            .await
            .unwrap();
        assert!(store.delete_paste("abc").await.unwrap());
        assert!(!store.delete_paste("abc").await.unwrap());
        assert!(!store.paste_exists("abc").await.unwrap());
    }

    #[tokio::test]
    async fn huge_offset_yields_an_empty_page() {
        let store = SqlitePasteStore::open_memory().unwrap();
        store
            .insert_paste(paste("abc", Some("u1"), Utc::now()))
            .await
            .unwrap();

        let filter = PasteFilter {
            skip: usize::MAX,
            limit: Some(usize::MAX),
            ..PasteFilter::owned_by("u1")
        };
        assert!(store.find_pastes(&filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn live_filter_skips_expired_rows() {
        let store = SqlitePasteStore::open_memory().unwrap();
        let now = Utc::now();
        let mut stale = paste("stale", Some("u1"), now - Duration::hours(2));
        stale.deletes_at = Some(now - Duration::hours(1));
        let mut fresh = paste("fresh", Some("u1"), now);
        fresh.deletes_at = Some(now + Duration::hours(1));
        store.insert_paste(stale).await.unwrap();
        store.insert_paste(fresh).await.unwrap();
        store
            .insert_paste(paste("forever", Some("u1"), now))
            .await
            .unwrap();

        let live = PasteFilter {
            live_at: Some(now),
            ..PasteFilter::owned_by("u1")
        };
        assert_eq!(store.count_pastes(&live).await.unwrap(), 2);
        let mut ids: Vec<String> = store
            .find_pastes(&live)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        ids.sort();
        assert_eq!(ids, ["forever", "fresh"]);
        assert!(store.paste_exists("stale").await.unwrap());
    }

    #[tokio::test]
    async fn token_round_trip() {
        let store = SqlitePasteStore::open_memory().unwrap();
        let now = Utc::now();
        for (id, age) in [("old", 2), ("new", 0)] {
            store
                .insert_token(AccessToken {
                    id: id.into(),
                    description: String::new(),
                    token_hash: "hash".into(),
                    owner_id: "u1".into(),
                    scopes: vec![Scope::Paste],
                    created_at: now - Duration::hours(age),
                    expires_at: None,
                    hidden: false,
                })
                .await
                .unwrap();
        }

        let tokens = store.tokens_for_owner("u1").await.unwrap();
        assert_eq!(tokens[0].id, "new");
        assert_eq!(tokens[1].scopes, vec![Scope::Paste]);
        assert!(store.delete_token("old").await.unwrap());
        assert!(store.get_token("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reopening_a_file_keeps_data() {
        let path = std::env::temp_dir()
            .join(format!("pastekeep-{}", crate::service::ids::generate_id()))
            .join("store.db");

        {
            let store = SqlitePasteStore::open(&path).unwrap();
            store
                .insert_paste(paste("keep", None, Utc::now()))
                .await
                .unwrap();
        }

        let store = SqlitePasteStore::open(&path).unwrap();
        assert!(store.paste_exists("keep").await.unwrap());

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
