//! SQLite-backed call store

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{CallStore, StoreResult};
use crate::models::{CallKey, CallRecord, CallUpdate, TenantProfile};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS calls (
        id                  TEXT PRIMARY KEY,
        provider            TEXT NOT NULL,
        provider_call_id    TEXT NOT NULL,
        call_sid            TEXT,
        from_phone          TEXT NOT NULL DEFAULT 'unknown',
        to_phone            TEXT NOT NULL DEFAULT 'unknown',
        status              TEXT NOT NULL DEFAULT 'unknown',
        recording_url       TEXT,
        transcription       TEXT,
        raw_json            TEXT,
        missed_at           TEXT,
        followup_sent_at    TEXT,
        followup_message_id TEXT,
        created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        updated_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        UNIQUE (provider, provider_call_id)
    );

    CREATE INDEX IF NOT EXISTS idx_calls_call_sid ON calls(provider, call_sid);
    CREATE INDEX IF NOT EXISTS idx_calls_provider_call_id ON calls(provider_call_id);

    CREATE TABLE IF NOT EXISTS tenants (
        systemix_number TEXT PRIMARY KEY,
        company_name    TEXT,
        name            TEXT
    );
";

const RECORD_COLUMNS: &str = "id, provider, provider_call_id, call_sid, from_phone, to_phone, \
     status, recording_url, transcription, raw_json, missed_at, followup_sent_at, \
     followup_message_id";

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<CallRecord> {
    Ok(CallRecord {
        id: row.get(0)?,
        provider: row.get(1)?,
        provider_call_id: row.get(2)?,
        call_sid: row.get(3)?,
        from_phone: row.get(4)?,
        to_phone: row.get(5)?,
        status: row.get(6)?,
        recording_url: row.get(7)?,
        transcription: row.get(8)?,
        raw_json: row.get(9)?,
        missed_at: row.get(10)?,
        followup_sent_at: row.get(11)?,
        followup_message_id: row.get(12)?,
    })
}

/// Call store over a single SQLite connection.
///
/// Each operation is one statement, so SQLite's statement atomicity gives the
/// per-row guarantees the pipeline relies on.
pub struct SqliteCallStore {
    conn: Mutex<Connection>,
}

impl SqliteCallStore {
    /// Open (creating if needed) the database file and ensure the schema exists.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves nothing half-written; keep serving.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register or rename the business behind a provider-facing number.
    pub fn upsert_tenant(&self, tenant: &TenantProfile) -> StoreResult<()> {
        self.conn().execute(
            "INSERT INTO tenants (systemix_number, company_name, name) VALUES (?1, ?2, ?3)
             ON CONFLICT(systemix_number) DO UPDATE SET
                 company_name = excluded.company_name,
                 name = excluded.name",
            params![tenant.systemix_number, tenant.company_name, tenant.name],
        )?;
        Ok(())
    }
}

impl CallStore for SqliteCallStore {
    fn upsert_from_callback(&self, key: &CallKey, update: &CallUpdate) -> StoreResult<()> {
        let mut columns = vec!["id", "provider", "provider_call_id", "updated_at"];
        let mut values = vec![
            uuid::Uuid::new_v4().to_string(),
            key.provider.clone(),
            key.provider_call_id.clone(),
            now(),
        ];

        let supplied = [
            ("call_sid", update.call_sid.clone()),
            ("from_phone", update.from_phone.clone()),
            ("to_phone", update.to_phone.clone()),
            ("status", update.status.clone()),
            ("recording_url", update.recording_url.clone()),
            ("transcription", update.transcription.clone()),
            (
                "raw_json",
                update.raw_json.as_ref().map(serde_json::to_string).transpose()?,
            ),
        ];
        for (column, value) in supplied {
            if let Some(value) = value {
                columns.push(column);
                values.push(value);
            }
        }

        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();
        // Identity columns are never rewritten on conflict
        let assignments: Vec<String> = columns[3..]
            .iter()
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();

        let sql = format!(
            "INSERT INTO calls ({}) VALUES ({})
             ON CONFLICT(provider, provider_call_id) DO UPDATE SET {}",
            columns.join(", "),
            placeholders.join(", "),
            assignments.join(", ")
        );

        self.conn().execute(&sql, params_from_iter(values.iter()))?;
        Ok(())
    }

    fn mark_followup(&self, key: &CallKey, message_id: Option<&str>) -> StoreResult<()> {
        let ts = now();
        self.conn().execute(
            "UPDATE calls
             SET missed_at = COALESCE(missed_at, ?1),
                 followup_sent_at = COALESCE(followup_sent_at, ?1),
                 followup_message_id = COALESCE(followup_message_id, ?2),
                 updated_at = ?1
             WHERE provider = ?3 AND provider_call_id = ?4",
            params![ts, message_id, key.provider, key.provider_call_id],
        )?;
        Ok(())
    }

    fn find_by_key(&self, key: &CallKey) -> StoreResult<Option<CallRecord>> {
        let sql = format!(
            "SELECT {} FROM calls WHERE provider = ?1 AND provider_call_id = ?2 LIMIT 1",
            RECORD_COLUMNS
        );
        let record = self
            .conn()
            .query_row(&sql, params![key.provider, key.provider_call_id], row_to_record)
            .optional()?;
        Ok(record)
    }

    fn find_by_call_sid(&self, provider: &str, call_sid: &str) -> StoreResult<Option<CallRecord>> {
        let sql = format!(
            "SELECT {} FROM calls WHERE provider = ?1 AND call_sid = ?2
             ORDER BY updated_at DESC LIMIT 1",
            RECORD_COLUMNS
        );
        let record = self
            .conn()
            .query_row(&sql, params![provider, call_sid], row_to_record)
            .optional()?;
        Ok(record)
    }

    fn find_tenant(&self, systemix_number: &str) -> StoreResult<Option<TenantProfile>> {
        let tenant = self
            .conn()
            .query_row(
                "SELECT systemix_number, company_name, name FROM tenants
                 WHERE systemix_number = ?1 LIMIT 1",
                params![systemix_number],
                |row| {
                    Ok(TenantProfile {
                        systemix_number: row.get(0)?,
                        company_name: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CallKey {
        CallKey::new("twilio", "CA100")
    }

    fn status_update(status: &str) -> CallUpdate {
        CallUpdate {
            call_sid: Some("CA100".to_string()),
            from_phone: Some("+15550001111".to_string()),
            to_phone: Some("+15550002222".to_string()),
            status: Some(status.to_string()),
            raw_json: Some(serde_json::json!({ "callStatus": status })),
            ..Default::default()
        }
    }

    fn count_rows(store: &SqliteCallStore) -> i64 {
        store
            .conn()
            .query_row("SELECT COUNT(*) FROM calls", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_insert_applies_defaults() {
        let store = SqliteCallStore::open_in_memory().unwrap();
        store
            .upsert_from_callback(&key(), &CallUpdate::default())
            .unwrap();

        let record = store.find_by_key(&key()).unwrap().unwrap();
        assert_eq!(record.from_phone, "unknown");
        assert_eq!(record.to_phone, "unknown");
        assert_eq!(record.status, "unknown");
        assert_eq!(record.call_sid, None);
        assert!(record.missed_at.is_none());
    }

    #[test]
    fn test_upsert_merges_into_one_row() {
        let store = SqliteCallStore::open_in_memory().unwrap();
        store
            .upsert_from_callback(&key(), &status_update("ringing"))
            .unwrap();
        store
            .upsert_from_callback(
                &key(),
                &CallUpdate {
                    status: Some("recorded".to_string()),
                    recording_url: Some("https://api.twilio.com/rec/RE1".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(count_rows(&store), 1);
        let record = store.find_by_key(&key()).unwrap().unwrap();
        assert_eq!(record.status, "recorded");
        assert_eq!(
            record.recording_url.as_deref(),
            Some("https://api.twilio.com/rec/RE1")
        );
        // Columns not mentioned by the second callback survive
        assert_eq!(record.from_phone, "+15550001111");
        assert_eq!(record.call_sid.as_deref(), Some("CA100"));
        assert!(record.raw_json.unwrap().contains("ringing"));
    }

    #[test]
    fn test_same_call_id_different_provider_is_distinct() {
        let store = SqliteCallStore::open_in_memory().unwrap();
        store
            .upsert_from_callback(&key(), &CallUpdate::status("busy"))
            .unwrap();
        store
            .upsert_from_callback(&CallKey::new("simulate", "CA100"), &CallUpdate::status("initiated"))
            .unwrap();
        assert_eq!(count_rows(&store), 2);
    }

    #[test]
    fn test_mark_followup_is_write_once() {
        let store = SqliteCallStore::open_in_memory().unwrap();
        store
            .upsert_from_callback(&key(), &status_update("no-answer"))
            .unwrap();

        store.mark_followup(&key(), Some("SM1")).unwrap();
        let first = store.find_by_key(&key()).unwrap().unwrap();
        assert!(first.followup_sent());
        assert!(first.missed_at.is_some());
        assert_eq!(first.followup_message_id.as_deref(), Some("SM1"));

        std::thread::sleep(std::time::Duration::from_millis(5));
        store.mark_followup(&key(), Some("SM2")).unwrap();
        let second = store.find_by_key(&key()).unwrap().unwrap();
        assert_eq!(second.followup_sent_at, first.followup_sent_at);
        assert_eq!(second.missed_at, first.missed_at);
        assert_eq!(second.followup_message_id.as_deref(), Some("SM1"));

        // A later callback cannot clear the markers either
        store
            .upsert_from_callback(&key(), &status_update("completed"))
            .unwrap();
        let third = store.find_by_key(&key()).unwrap().unwrap();
        assert_eq!(third.followup_sent_at, first.followup_sent_at);
    }

    #[test]
    fn test_mark_followup_without_message_id() {
        let store = SqliteCallStore::open_in_memory().unwrap();
        store
            .upsert_from_callback(&key(), &status_update("busy"))
            .unwrap();
        store.mark_followup(&key(), None).unwrap();
        store.mark_followup(&key(), Some("SM9")).unwrap();

        let record = store.find_by_key(&key()).unwrap().unwrap();
        // Still unset after the first mark, so the later id fills it
        assert_eq!(record.followup_message_id.as_deref(), Some("SM9"));
    }

    #[test]
    fn test_lookups() {
        let store = SqliteCallStore::open_in_memory().unwrap();
        assert!(store.find_by_key(&key()).unwrap().is_none());
        assert!(store.find_by_call_sid("twilio", "CA100").unwrap().is_none());

        let parent = CallKey::new("twilio", "CA-parent");
        store
            .upsert_from_callback(&parent, &status_update("completed"))
            .unwrap();
        assert_eq!(store.find_by_key(&parent).unwrap().unwrap().status, "completed");

        let by_sid = store.find_by_call_sid("twilio", "CA100").unwrap().unwrap();
        assert_eq!(by_sid.provider_call_id, "CA-parent");
        assert!(store.find_by_call_sid("simulate", "CA100").unwrap().is_none());
    }

    #[test]
    fn test_tenant_lookup() {
        let store = SqliteCallStore::open_in_memory().unwrap();
        assert!(store.find_tenant("+15550002222").unwrap().is_none());

        store
            .upsert_tenant(&TenantProfile {
                systemix_number: "+15550002222".to_string(),
                company_name: Some("Acme Plumbing".to_string()),
                name: None,
            })
            .unwrap();

        let tenant = store.find_tenant("+15550002222").unwrap().unwrap();
        assert_eq!(tenant.display_name(), Some("Acme Plumbing"));
    }

    #[test]
    fn test_file_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calls.db");

        {
            let store = SqliteCallStore::open(&path).unwrap();
            store
                .upsert_from_callback(&key(), &status_update("no-answer"))
                .unwrap();
            store.mark_followup(&key(), Some("SM1")).unwrap();
        }

        let reopened = SqliteCallStore::open(&path).unwrap();
        let record = reopened.find_by_key(&key()).unwrap().unwrap();
        assert_eq!(record.status, "no-answer");
        assert_eq!(record.followup_message_id.as_deref(), Some("SM1"));
    }
}
