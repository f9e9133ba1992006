//! SQLite-backed maintenance ledger.
//!
//! Holds the provider/circuit inventory the reconciler resolves against and
//! the six ledger entities produced by ingestion. Mutations are free functions
//! over `&mut SqliteConnection` so callers can run them inside one transaction
//! per notification.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use uuid::Uuid;

use super::models::{
    Circuit, CircuitImpact, CircuitMaintenance, Impact, MaintenanceStatus, Note, NoteLevel,
    ParsedNotification, Provider, RawNotification, split_emails,
};
use crate::{Error, Result};

/// Handle to the ledger database.
#[derive(Clone)]
pub struct LedgerStore {
    pool: SqlitePool,
}

impl LedgerStore {
    /// Create (or open) a ledger at the given file path and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::backend("ledger mkdir", e))?;
            }
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path.display()))
            .map_err(|e| Error::backend("ledger connect options", e))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(|e| Error::backend("ledger connect", e))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Single-connection in-memory ledger. The connection is never recycled,
    /// otherwise the database would vanish with it.
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::backend("ledger connect options", e))?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(|e| Error::backend("ledger connect", e))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::backend("ledger schema", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    #[tracing::instrument(level = "debug", skip(self, provider), fields(slug = %provider.slug))]
    pub async fn upsert_provider(&self, provider: &Provider) -> Result<Provider> {
        sqlx::query(
            r#"
INSERT INTO providers (id, slug, name, notification_emails, parser_type)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(slug) DO UPDATE SET
  name = excluded.name,
  notification_emails = excluded.notification_emails,
  parser_type = excluded.parser_type
"#,
        )
        .bind(provider.id.to_string())
        .bind(&provider.slug)
        .bind(&provider.name)
        .bind(provider.joined_emails())
        .bind(&provider.parser_type)
        .execute(&self.pool)
        .await?;

        let mut conn = self.pool.acquire().await?;
        find_provider_by_slug(&mut conn, &provider.slug)
            .await?
            .ok_or_else(|| Error::NotFound(format!("provider '{}'", provider.slug)))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn upsert_circuit(&self, provider_id: Uuid, cid: &str) -> Result<Circuit> {
        if cid.trim().is_empty() {
            return Err(Error::InvalidInput("circuit id is empty".to_string()));
        }
        sqlx::query(
            r#"
INSERT INTO circuits (id, provider_id, cid) VALUES (?1, ?2, ?3)
ON CONFLICT(provider_id, cid) DO NOTHING
"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(provider_id.to_string())
        .bind(cid.trim())
        .execute(&self.pool)
        .await?;

        let mut conn = self.pool.acquire().await?;
        find_circuit(&mut conn, provider_id, cid)
            .await?
            .ok_or_else(|| Error::NotFound(format!("circuit '{cid}'")))
    }

    pub async fn list_providers(&self) -> Result<Vec<Provider>> {
        let rows = sqlx::query(
            "SELECT id, slug, name, notification_emails, parser_type FROM providers ORDER BY slug",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(provider_from_row).collect()
    }

    /// Stamp of the newest stored raw notification, the ingestion watermark.
    pub async fn latest_raw_stamp(&self) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT stamp FROM raw_notifications ORDER BY stamp DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| -> Result<DateTime<Utc>> { parse_ts(&r.try_get::<String, _>("stamp")?) })
            .transpose()
    }

    pub async fn get_raw_notification(&self, id: Uuid) -> Result<Option<RawNotification>> {
        let row = sqlx::query(
            r#"
SELECT id, subject, sender, provider_id, source, stamp, raw, parsed, created_at
  FROM raw_notifications WHERE id = ?1
"#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(raw_notification_from_row).transpose()
    }

    pub async fn count_raw_notifications(&self) -> Result<i64> {
        count(&self.pool, "SELECT COUNT(*) AS n FROM raw_notifications").await
    }

    pub async fn get_circuit_maintenance(&self, name: &str) -> Result<Option<CircuitMaintenance>> {
        let mut conn = self.pool.acquire().await?;
        find_maintenance_by_name(&mut conn, name).await
    }

    pub async fn count_circuit_maintenances(&self) -> Result<i64> {
        count(&self.pool, "SELECT COUNT(*) AS n FROM circuit_maintenances").await
    }

    /// Impacts of a maintenance paired with the circuit id they refer to.
    pub async fn list_impacts(&self, maintenance_id: Uuid) -> Result<Vec<(CircuitImpact, String)>> {
        let mut conn = self.pool.acquire().await?;
        list_impacts_with_cid(&mut conn, maintenance_id).await
    }

    pub async fn list_notes(&self, maintenance_id: Uuid) -> Result<Vec<Note>> {
        let rows = sqlx::query(
            r#"
SELECT id, maintenance_id, title, level, comment
  FROM notes WHERE maintenance_id = ?1 ORDER BY title
"#,
        )
        .bind(maintenance_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<Note> {
                Ok(Note {
                    id: parse_uuid(&row.try_get::<String, _>("id")?)?,
                    maintenance_id: parse_uuid(&row.try_get::<String, _>("maintenance_id")?)?,
                    title: row.try_get("title")?,
                    level: NoteLevel::parse(&row.try_get::<String, _>("level")?),
                    comment: row.try_get("comment")?,
                })
            })
            .collect()
    }

    pub async fn list_parsed_notifications(
        &self,
        maintenance_id: Uuid,
    ) -> Result<Vec<ParsedNotification>> {
        let rows = sqlx::query(
            r#"
SELECT id, maintenance_id, raw_notification_id, json, created_at
  FROM parsed_notifications WHERE maintenance_id = ?1 ORDER BY seq
"#,
        )
        .bind(maintenance_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<ParsedNotification> {
                let json: String = row.try_get("json")?;
                Ok(ParsedNotification {
                    id: parse_uuid(&row.try_get::<String, _>("id")?)?,
                    maintenance_id: parse_uuid(&row.try_get::<String, _>("maintenance_id")?)?,
                    raw_notification_id: parse_uuid(
                        &row.try_get::<String, _>("raw_notification_id")?,
                    )?,
                    json: serde_json::from_str(&json)
                        .map_err(|e| Error::backend("deserialize parsed notification", e))?,
                    created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
                })
            })
            .collect()
    }

    pub async fn count_parsed_notifications(&self) -> Result<i64> {
        count(&self.pool, "SELECT COUNT(*) AS n FROM parsed_notifications").await
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS providers (
  id TEXT PRIMARY KEY,
  slug TEXT NOT NULL UNIQUE,
  name TEXT NOT NULL,
  notification_emails TEXT NOT NULL,
  parser_type TEXT NULL
);

CREATE TABLE IF NOT EXISTS circuits (
  id TEXT PRIMARY KEY,
  provider_id TEXT NOT NULL REFERENCES providers(id),
  cid TEXT NOT NULL,
  UNIQUE (provider_id, cid)
);
CREATE INDEX IF NOT EXISTS circuits_provider_cid_nocase_idx
  ON circuits(provider_id, cid COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS raw_notifications (
  id TEXT PRIMARY KEY,
  subject TEXT NOT NULL,
  sender TEXT NOT NULL,
  provider_id TEXT NOT NULL REFERENCES providers(id),
  source TEXT NOT NULL,
  stamp TEXT NOT NULL,
  raw BLOB NOT NULL,
  parsed INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL,
  UNIQUE (subject, provider_id, stamp)
);
CREATE INDEX IF NOT EXISTS raw_notifications_stamp_idx ON raw_notifications(stamp DESC);

CREATE TABLE IF NOT EXISTS circuit_maintenances (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL UNIQUE,
  start_time TEXT NOT NULL,
  end_time TEXT NOT NULL,
  description TEXT NOT NULL,
  status TEXT NOT NULL,
  ack INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS circuit_impacts (
  id TEXT PRIMARY KEY,
  maintenance_id TEXT NOT NULL REFERENCES circuit_maintenances(id),
  circuit_id TEXT NOT NULL REFERENCES circuits(id),
  impact TEXT NOT NULL,
  UNIQUE (maintenance_id, circuit_id)
);

CREATE TABLE IF NOT EXISTS notes (
  id TEXT PRIMARY KEY,
  maintenance_id TEXT NOT NULL REFERENCES circuit_maintenances(id),
  title TEXT NOT NULL,
  level TEXT NOT NULL,
  comment TEXT NOT NULL,
  UNIQUE (maintenance_id, title)
);

CREATE TABLE IF NOT EXISTS parsed_notifications (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  id TEXT NOT NULL UNIQUE,
  maintenance_id TEXT NOT NULL REFERENCES circuit_maintenances(id),
  raw_notification_id TEXT NOT NULL REFERENCES raw_notifications(id),
  json TEXT NOT NULL,
  created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS parsed_notifications_maintenance_idx
  ON parsed_notifications(maintenance_id, seq);
"#;

/// Fixed-width RFC 3339 so that lexical order matches chronological order.
pub fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| Error::backend(format!("parse timestamp '{s}'"), e))
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::backend(format!("parse uuid '{s}'"), e))
}

async fn count(pool: &SqlitePool, sql: &str) -> Result<i64> {
    let row = sqlx::query(sql).fetch_one(pool).await?;
    Ok(row.try_get::<i64, _>("n")?)
}

fn provider_from_row(row: &SqliteRow) -> Result<Provider> {
    Ok(Provider {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        slug: row.try_get("slug")?,
        name: row.try_get("name")?,
        notification_emails: split_emails(&row.try_get::<String, _>("notification_emails")?),
        parser_type: row.try_get("parser_type")?,
    })
}

fn raw_notification_from_row(row: &SqliteRow) -> Result<RawNotification> {
    Ok(RawNotification {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        subject: row.try_get("subject")?,
        sender: row.try_get("sender")?,
        provider_id: parse_uuid(&row.try_get::<String, _>("provider_id")?)?,
        source: row.try_get("source")?,
        stamp: parse_ts(&row.try_get::<String, _>("stamp")?)?,
        raw: row.try_get("raw")?,
        parsed: row.try_get("parsed")?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn maintenance_from_row(row: &SqliteRow) -> Result<CircuitMaintenance> {
    Ok(CircuitMaintenance {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        name: row.try_get("name")?,
        start_time: parse_ts(&row.try_get::<String, _>("start_time")?)?,
        end_time: parse_ts(&row.try_get::<String, _>("end_time")?)?,
        description: row.try_get("description")?,
        status: row
            .try_get::<String, _>("status")?
            .parse::<MaintenanceStatus>()
            .unwrap_or(MaintenanceStatus::Unknown),
        ack: row.try_get("ack")?,
    })
}

pub async fn find_provider_by_slug(
    conn: &mut SqliteConnection,
    slug: &str,
) -> Result<Option<Provider>> {
    let row = sqlx::query(
        "SELECT id, slug, name, notification_emails, parser_type FROM providers WHERE slug = ?1",
    )
    .bind(slug)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(provider_from_row).transpose()
}

/// Resolve a provider circuit by case-insensitive id.
pub async fn find_circuit(
    conn: &mut SqliteConnection,
    provider_id: Uuid,
    cid: &str,
) -> Result<Option<Circuit>> {
    let row = sqlx::query(
        r#"
SELECT id, provider_id, cid FROM circuits
 WHERE provider_id = ?1 AND cid = ?2 COLLATE NOCASE
 LIMIT 1
"#,
    )
    .bind(provider_id.to_string())
    .bind(cid.trim())
    .fetch_optional(&mut *conn)
    .await?;
    row.map(|row| -> Result<Circuit> {
        Ok(Circuit {
            id: parse_uuid(&row.try_get::<String, _>("id")?)?,
            provider_id: parse_uuid(&row.try_get::<String, _>("provider_id")?)?,
            cid: row.try_get("cid")?,
        })
    })
    .transpose()
}

/// Insert a raw notification. Returns `false` when an entry with the same
/// (subject, provider, stamp) already exists.
pub async fn insert_raw_notification(
    conn: &mut SqliteConnection,
    raw: &RawNotification,
) -> Result<bool> {
    let done = sqlx::query(
        r#"
INSERT INTO raw_notifications
  (id, subject, sender, provider_id, source, stamp, raw, parsed, created_at)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
ON CONFLICT(subject, provider_id, stamp) DO NOTHING
"#,
    )
    .bind(raw.id.to_string())
    .bind(&raw.subject)
    .bind(&raw.sender)
    .bind(raw.provider_id.to_string())
    .bind(&raw.source)
    .bind(fmt_ts(&raw.stamp))
    .bind(&raw.raw)
    .bind(raw.parsed)
    .bind(fmt_ts(&raw.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(done.rows_affected() > 0)
}

pub async fn find_raw_notification_id(
    conn: &mut SqliteConnection,
    subject: &str,
    provider_id: Uuid,
    stamp: &DateTime<Utc>,
) -> Result<Option<Uuid>> {
    let row = sqlx::query(
        r#"
SELECT id FROM raw_notifications
 WHERE subject = ?1 AND provider_id = ?2 AND stamp = ?3
 LIMIT 1
"#,
    )
    .bind(subject)
    .bind(provider_id.to_string())
    .bind(fmt_ts(stamp))
    .fetch_optional(&mut *conn)
    .await?;
    row.map(|r| -> Result<Uuid> { parse_uuid(&r.try_get::<String, _>("id")?) })
        .transpose()
}

pub async fn mark_raw_parsed(conn: &mut SqliteConnection, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE raw_notifications SET parsed = 1 WHERE id = ?1")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn find_maintenance_by_name(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<Option<CircuitMaintenance>> {
    let row = sqlx::query(
        r#"
SELECT id, name, start_time, end_time, description, status, ack
  FROM circuit_maintenances WHERE name = ?1
"#,
    )
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(maintenance_from_row).transpose()
}

pub async fn insert_maintenance(
    conn: &mut SqliteConnection,
    maintenance: &CircuitMaintenance,
) -> Result<()> {
    sqlx::query(
        r#"
INSERT INTO circuit_maintenances (id, name, start_time, end_time, description, status, ack)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#,
    )
    .bind(maintenance.id.to_string())
    .bind(&maintenance.name)
    .bind(fmt_ts(&maintenance.start_time))
    .bind(fmt_ts(&maintenance.end_time))
    .bind(&maintenance.description)
    .bind(maintenance.status.as_str())
    .bind(maintenance.ack)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn update_maintenance(
    conn: &mut SqliteConnection,
    maintenance: &CircuitMaintenance,
) -> Result<()> {
    sqlx::query(
        r#"
UPDATE circuit_maintenances
   SET start_time = ?2,
       end_time = ?3,
       description = ?4,
       status = ?5,
       ack = ?6
 WHERE id = ?1
"#,
    )
    .bind(maintenance.id.to_string())
    .bind(fmt_ts(&maintenance.start_time))
    .bind(fmt_ts(&maintenance.end_time))
    .bind(&maintenance.description)
    .bind(maintenance.status.as_str())
    .bind(maintenance.ack)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn list_impacts_with_cid(
    conn: &mut SqliteConnection,
    maintenance_id: Uuid,
) -> Result<Vec<(CircuitImpact, String)>> {
    let rows = sqlx::query(
        r#"
SELECT ci.id AS id, ci.maintenance_id AS maintenance_id, ci.circuit_id AS circuit_id,
       ci.impact AS impact, c.cid AS cid
  FROM circuit_impacts ci
  JOIN circuits c ON c.id = ci.circuit_id
 WHERE ci.maintenance_id = ?1
 ORDER BY c.cid
"#,
    )
    .bind(maintenance_id.to_string())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter()
        .map(|row| -> Result<(CircuitImpact, String)> {
            let impact = CircuitImpact {
                id: parse_uuid(&row.try_get::<String, _>("id")?)?,
                maintenance_id: parse_uuid(&row.try_get::<String, _>("maintenance_id")?)?,
                circuit_id: parse_uuid(&row.try_get::<String, _>("circuit_id")?)?,
                impact: row.try_get::<String, _>("impact")?.parse::<Impact>()?,
            };
            Ok((impact, row.try_get::<String, _>("cid")?))
        })
        .collect()
}

pub async fn insert_impact(conn: &mut SqliteConnection, impact: &CircuitImpact) -> Result<()> {
    sqlx::query(
        r#"
INSERT INTO circuit_impacts (id, maintenance_id, circuit_id, impact)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(maintenance_id, circuit_id) DO UPDATE SET impact = excluded.impact
"#,
    )
    .bind(impact.id.to_string())
    .bind(impact.maintenance_id.to_string())
    .bind(impact.circuit_id.to_string())
    .bind(impact.impact.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn update_impact(conn: &mut SqliteConnection, id: Uuid, impact: Impact) -> Result<()> {
    sqlx::query("UPDATE circuit_impacts SET impact = ?2 WHERE id = ?1")
        .bind(id.to_string())
        .bind(impact.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn delete_impact(conn: &mut SqliteConnection, id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM circuit_impacts WHERE id = ?1")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Create the note unless one with the same (maintenance, title) exists.
/// Returns `true` when a new row was written.
pub async fn ensure_note(conn: &mut SqliteConnection, note: &Note) -> Result<bool> {
    let done = sqlx::query(
        r#"
INSERT INTO notes (id, maintenance_id, title, level, comment)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(maintenance_id, title) DO NOTHING
"#,
    )
    .bind(note.id.to_string())
    .bind(note.maintenance_id.to_string())
    .bind(&note.title)
    .bind(note.level.as_str())
    .bind(&note.comment)
    .execute(&mut *conn)
    .await?;
    Ok(done.rows_affected() > 0)
}

/// Stamp of the newest raw notification already applied to a maintenance.
pub async fn latest_applied_stamp(
    conn: &mut SqliteConnection,
    maintenance_id: Uuid,
) -> Result<Option<DateTime<Utc>>> {
    let row = sqlx::query(
        r#"
SELECT r.stamp AS stamp
  FROM parsed_notifications p
  JOIN raw_notifications r ON r.id = p.raw_notification_id
 WHERE p.maintenance_id = ?1
 ORDER BY r.stamp DESC, p.seq DESC
 LIMIT 1
"#,
    )
    .bind(maintenance_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;
    row.map(|r| -> Result<DateTime<Utc>> { parse_ts(&r.try_get::<String, _>("stamp")?) })
        .transpose()
}

pub async fn insert_parsed_notification(
    conn: &mut SqliteConnection,
    parsed: &ParsedNotification,
) -> Result<()> {
    let json = serde_json::to_string(&parsed.json)
        .map_err(|e| Error::backend("serialize parsed notification", e))?;
    sqlx::query(
        r#"
INSERT INTO parsed_notifications (id, maintenance_id, raw_notification_id, json, created_at)
VALUES (?1, ?2, ?3, ?4, ?5)
"#,
    )
    .bind(parsed.id.to_string())
    .bind(parsed.maintenance_id.to_string())
    .bind(parsed.raw_notification_id.to_string())
    .bind(json)
    .bind(fmt_ts(&parsed.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn store() -> (tempfile::TempDir, LedgerStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::open(dir.path().join("ledger.db")).await.unwrap();
        (dir, store)
    }

    #[test]
    fn timestamps_sort_lexically() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let b = a + chrono::Duration::milliseconds(1500);
        assert!(fmt_ts(&a) < fmt_ts(&b));
        assert_eq!(parse_ts(&fmt_ts(&b)).unwrap(), b);
    }

    #[tokio::test]
    async fn circuits_resolve_case_insensitively_within_provider() {
        let (_dir, store) = store().await;
        let ntt = store
            .upsert_provider(&Provider::new("ntt", "NTT", "noc@ntt.net").unwrap())
            .await
            .unwrap();
        let other = store
            .upsert_provider(&Provider::new("zayo", "Zayo", "mr@zayo.com").unwrap())
            .await
            .unwrap();
        store.upsert_circuit(ntt.id, "CID-1").await.unwrap();

        let mut conn = store.pool().acquire().await.unwrap();
        assert!(find_circuit(&mut conn, ntt.id, "cid-1").await.unwrap().is_some());
        assert!(find_circuit(&mut conn, other.id, "CID-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn raw_notification_insert_is_idempotent() {
        let (_dir, store) = store().await;
        let provider = store
            .upsert_provider(&Provider::new("ntt", "NTT", "noc@ntt.net").unwrap())
            .await
            .unwrap();
        let stamp = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let raw = RawNotification {
            id: Uuid::new_v4(),
            subject: "Maintenance".to_string(),
            sender: "noc@ntt.net".to_string(),
            provider_id: provider.id,
            source: "inbox".to_string(),
            stamp,
            raw: b"body".to_vec(),
            parsed: false,
            created_at: Utc::now(),
        };

        let mut conn = store.pool().acquire().await.unwrap();
        assert!(insert_raw_notification(&mut conn, &raw).await.unwrap());
        let again = RawNotification {
            id: Uuid::new_v4(),
            ..raw.clone()
        };
        assert!(!insert_raw_notification(&mut conn, &again).await.unwrap());
        assert_eq!(
            find_raw_notification_id(&mut conn, "Maintenance", provider.id, &stamp)
                .await
                .unwrap(),
            Some(raw.id)
        );
        drop(conn);
        assert_eq!(store.count_raw_notifications().await.unwrap(), 1);
        assert_eq!(store.latest_raw_stamp().await.unwrap(), Some(stamp));
    }
}
