//! SQLite-backed user store.
//!
//! One row per user. Identifiers are stored as the JSON object form of a
//! [`Set`] and searched with `json_each`; the email fallback uses a second
//! JSON column holding every email-kind value the user has, so the lookup
//! never needs to parse identifier keys in SQL.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use tokio_util::sync::CancellationToken;

use super::{User, UserError, UserStore, single_match};
use crate::identifier::{EMAIL, Identifier, Set};
use crate::preference::PreferenceMap;
use crate::validate::{Validate, ValidationError};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS users (\
     key TEXT PRIMARY KEY NOT NULL,\
     preferences TEXT NOT NULL DEFAULT '{}',\
     identifiers TEXT NOT NULL DEFAULT '{}',\
     emails TEXT NOT NULL DEFAULT '[]');";

const SELECT_USER: &str = "SELECT DISTINCT u.key, u.preferences, u.identifiers FROM users u";

/// User store persisted in a SQLite database.
///
/// The connection is shared behind a mutex and every query runs on the
/// blocking thread pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, UserError> {
        let conn = Connection::open(path).map_err(storage)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(storage)?;
        Self::init(conn)
    }

    /// A private, non-persistent database.
    pub fn in_memory() -> Result<Self, UserError> {
        Self::init(Connection::open_in_memory().map_err(storage)?)
    }

    fn init(conn: Connection) -> Result<Self, UserError> {
        conn.execute_batch(SCHEMA).map_err(storage)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, UserError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, UserError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| UserError::Storage("connection lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| UserError::Storage(format!("blocking task failed: {e}")))?
    }
}

fn storage(e: rusqlite::Error) -> UserError {
    UserError::Storage(e.to_string())
}

type Row = (String, String, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn decode((key, preferences, identifiers): Row) -> Result<User, UserError> {
    Ok(User {
        key,
        identifiers: serde_json::from_str::<Set>(&identifiers)?,
        preferences: serde_json::from_str::<PreferenceMap>(&preferences)?,
    })
}

fn query_users(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<User>, UserError> {
    let mut stmt = conn.prepare(sql).map_err(storage)?;
    let rows = stmt
        .query_map(args, read_row)
        .map_err(storage)?
        .collect::<rusqlite::Result<Vec<Row>>>()
        .map_err(storage)?;
    rows.into_iter().map(decode).collect()
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<User, UserError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT key, preferences, identifiers FROM users WHERE key = ?1",
                    params![key],
                    read_row,
                )
                .optional()
                .map_err(storage)?;
            match row {
                Some(row) => decode(row),
                None => Err(UserError::NotFound(key)),
            }
        })
        .await
    }

    async fn get_by_identifier(&self, id: &Identifier) -> Result<User, UserError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let exact = query_users(
                conn,
                &format!("{SELECT_USER}, json_each(u.identifiers) j WHERE j.key = ?1 AND j.value = ?2"),
                params![id.namespace_and_kind().to_string(), id.value()],
            )?;
            if !exact.is_empty() || id.kind() != EMAIL {
                return single_match(&id, exact);
            }

            let by_email = query_users(
                conn,
                &format!("{SELECT_USER}, json_each(u.emails) j WHERE j.value = ?1"),
                params![id.value()],
            )?;
            single_match(&id, by_email)
        })
        .await
    }

    async fn set_preferences(&self, key: &str, preferences: PreferenceMap) -> Result<(), UserError> {
        let key = key.to_string();
        let encoded = serde_json::to_string(&preferences)?;
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE users SET preferences = ?1 WHERE key = ?2",
                    params![encoded, key],
                )
                .map_err(storage)?;
            if changed == 0 {
                return Err(UserError::NotFound(key));
            }
            Ok(())
        })
        .await
    }

    async fn put(&self, user: User) -> Result<(), UserError> {
        let preferences = serde_json::to_string(&user.preferences)?;
        let identifiers = serde_json::to_string(&user.identifiers)?;
        let emails = serde_json::to_string(&user.emails())?;
        let key = user.key;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (key, preferences, identifiers, emails) VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(key) DO UPDATE SET preferences = excluded.preferences, \
                 identifiers = excluded.identifiers, emails = excluded.emails",
                params![key, preferences, identifiers, emails],
            )
            .map_err(storage)?;
            Ok(())
        })
        .await
    }

    fn validator(&self) -> Option<&dyn Validate> {
        Some(self)
    }
}

#[async_trait]
impl Validate for SqliteStore {
    async fn validate(&self, cancel: &CancellationToken) -> Result<(), ValidationError> {
        let check = self.with_conn(|conn| {
            conn.query_row("SELECT json('{}'), count(*) FROM users", [], |_| Ok(()))
                .map_err(storage)
        });
        tokio::select! {
            _ = cancel.cancelled() => Err(ValidationError::new("sqlite user store", "cancelled")),
            result = check => result
                .map_err(|e| ValidationError::new("sqlite user store", "database check failed").with_source(e)),
        }
    }
}
