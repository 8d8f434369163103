//! Local SQLite backend.
//!
//! Rows are JSON documents keyed by `(table, id)`; storage objects are blobs.
//! Every write is published on an in-process change feed so subscriptions
//! behave like the hosted backend's realtime channel. Used for local
//! development and as the backend in tests.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{ChangeEvent, Filter, GatewayError, RemoteGateway, Row, Subscription};

/// Buffered change events per subscriber before it starts lagging.
const CHANGE_FEED_CAPACITY: usize = 256;

const LOCAL_SCHEME: &str = "local";

pub struct SqliteGateway {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<ChangeEvent>,
    signing_secret: String,
}

impl SqliteGateway {
    /// Open (or create) a database at an explicit path and apply the schema.
    pub fn open_at(path: PathBuf, signing_secret: &str) -> Result<Self, GatewayError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    GatewayError::Configuration(format!(
                        "Failed to create database directory: {}",
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        log::info!("SQLite gateway: opened {}", path.display());
        Self::from_connection(conn, signing_secret)
    }

    pub fn open_in_memory(signing_secret: &str) -> Result<Self, GatewayError> {
        Self::from_connection(Connection::open_in_memory()?, signing_secret)
    }

    fn from_connection(conn: Connection, signing_secret: &str) -> Result<Self, GatewayError> {
        crate::migrations::run_migrations(&conn).map_err(GatewayError::Migration)?;
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            changes,
            signing_secret: signing_secret.to_string(),
        })
    }

    /// Check a URL produced by [`RemoteGateway::signed_url`] against the
    /// signing secret and the given clock.
    pub fn verify_signed_url(&self, signed: &str, now_ts: i64) -> bool {
        let parsed = match url::Url::parse(signed) {
            Ok(u) if u.scheme() == LOCAL_SCHEME => u,
            _ => return false,
        };
        let bucket = match parsed.host_str() {
            Some(b) => b.to_string(),
            None => return false,
        };
        let path = parsed.path().trim_start_matches('/').to_string();

        let mut expires: Option<i64> = None;
        let mut token: Option<String> = None;
        for (k, v) in parsed.query_pairs() {
            match k.as_ref() {
                "expires" => expires = v.parse().ok(),
                "token" => token = Some(v.into_owned()),
                _ => {}
            }
        }

        match (expires, token) {
            (Some(exp), Some(tok)) => exp >= now_ts && tok == self.sign(&bucket, &path, exp),
            _ => false,
        }
    }

    fn sign(&self, bucket: &str, path: &str, expires_at: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.signing_secret.as_bytes());
        hasher.update(b"\n");
        hasher.update(bucket.as_bytes());
        hasher.update(b"\n");
        hasher.update(path.as_bytes());
        hasher.update(b"\n");
        hasher.update(expires_at.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn publish(&self, events: Vec<ChangeEvent>) {
        for event in events {
            // No receivers is the normal case when nothing is mounted.
            let _ = self.changes.send(event);
        }
    }

    fn load_matching(
        conn: &Connection,
        table: &str,
        filter: &Filter,
    ) -> Result<Vec<(String, Row)>, GatewayError> {
        let mut stmt = conn.prepare("SELECT id, data FROM records WHERE tbl = ?1 ORDER BY seq")?;
        let rows = stmt.query_map(params![table], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, data) = row?;
            let parsed: Row = serde_json::from_str(&data)?;
            if filter.matches(&parsed) {
                out.push((id, parsed));
            }
        }
        Ok(out)
    }

    fn select_sync(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, GatewayError> {
        let conn = self.conn.lock();
        Ok(Self::load_matching(&conn, table, filter)?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }

    fn insert_sync(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, GatewayError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut stored = Vec::with_capacity(rows.len());

        for mut row in rows {
            let id = match row.get("id") {
                Some(Value::String(s)) if !s.is_empty() => s.clone(),
                Some(Value::Null) | None => Uuid::new_v4().to_string(),
                Some(other) => other.to_string(),
            };
            row.insert("id".to_string(), Value::String(id.clone()));
            tx.execute(
                "INSERT INTO records (tbl, id, data, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![table, id, serde_json::to_string(&row)?, now],
            )?;
            stored.push(row);
        }
        tx.commit()?;
        Ok(stored)
    }

    fn update_sync(
        &self,
        table: &str,
        filter: &Filter,
        patch: &Row,
    ) -> Result<Vec<(Row, Row)>, GatewayError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let matching = Self::load_matching(&tx, table, filter)?;
        let mut changed = Vec::with_capacity(matching.len());

        for (id, old) in matching {
            let mut new = old.clone();
            for (k, v) in patch {
                if k != "id" {
                    new.insert(k.clone(), v.clone());
                }
            }
            tx.execute(
                "UPDATE records SET data = ?1, updated_at = ?2 WHERE tbl = ?3 AND id = ?4",
                params![serde_json::to_string(&new)?, now, table, id],
            )?;
            changed.push((old, new));
        }
        tx.commit()?;
        Ok(changed)
    }

    fn delete_sync(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, GatewayError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let matching = Self::load_matching(&tx, table, filter)?;
        for (id, _) in &matching {
            tx.execute(
                "DELETE FROM records WHERE tbl = ?1 AND id = ?2",
                params![table, id],
            )?;
        }
        tx.commit()?;
        Ok(matching.into_iter().map(|(_, row)| row).collect())
    }

    fn object_exists(&self, bucket: &str, path: &str) -> Result<bool, GatewayError> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM storage_objects WHERE bucket = ?1 AND path = ?2",
                params![bucket, path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl RemoteGateway for SqliteGateway {
    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, GatewayError> {
        self.select_sync(table, filter)
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, GatewayError> {
        let stored = self.insert_sync(table, rows)?;
        self.publish(
            stored
                .iter()
                .map(|row| ChangeEvent::Insert {
                    table: table.to_string(),
                    new: row.clone(),
                })
                .collect(),
        );
        Ok(stored)
    }

    async fn update(
        &self,
        table: &str,
        filter: &Filter,
        patch: Row,
    ) -> Result<Vec<Row>, GatewayError> {
        let changed = self.update_sync(table, filter, &patch)?;
        self.publish(
            changed
                .iter()
                .map(|(old, new)| ChangeEvent::Update {
                    table: table.to_string(),
                    old: old.clone(),
                    new: new.clone(),
                })
                .collect(),
        );
        Ok(changed.into_iter().map(|(_, new)| new).collect())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, GatewayError> {
        let removed = self.delete_sync(table, filter)?;
        self.publish(
            removed
                .iter()
                .map(|row| ChangeEvent::Delete {
                    table: table.to_string(),
                    old: row.clone(),
                })
                .collect(),
        );
        Ok(removed)
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), GatewayError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO storage_objects (bucket, path, content_type, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![bucket, path, content_type, bytes, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, GatewayError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT data FROM storage_objects WHERE bucket = ?1 AND path = ?2",
            params![bucket, path],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()?
        .ok_or_else(|| GatewayError::ObjectNotFound {
            bucket: bucket.to_string(),
            path: path.to_string(),
        })
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}://{}/{}", LOCAL_SCHEME, bucket, path)
    }

    async fn signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in: Duration,
    ) -> Result<String, GatewayError> {
        if !self.object_exists(bucket, path)? {
            return Err(GatewayError::ObjectNotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            });
        }
        let expires_at = i64::try_from(expires_in.as_secs())
            .ok()
            .and_then(|secs| Utc::now().timestamp().checked_add(secs))
            .ok_or_else(|| {
                GatewayError::Configuration(format!(
                    "signed URL lifetime of {}s is out of range",
                    expires_in.as_secs()
                ))
            })?;

        // Sign the path as it appears in the URL so verification sees the
        // same bytes after percent-encoding.
        let mut url = url::Url::parse(&self.public_url(bucket, path))
            .map_err(|e| GatewayError::Configuration(format!("Invalid storage path: {}", e)))?;
        let token = self.sign(bucket, url.path().trim_start_matches('/'), expires_at);
        url.query_pairs_mut()
            .append_pair("expires", &expires_at.to_string())
            .append_pair("token", &token);
        Ok(url.into())
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), GatewayError> {
        let conn = self.conn.lock();
        for path in paths {
            conn.execute(
                "DELETE FROM storage_objects WHERE bucket = ?1 AND path = ?2",
                params![bucket, path],
            )?;
        }
        Ok(())
    }

    async fn subscribe(&self, table: &str, filter: Filter) -> Result<Subscription, GatewayError> {
        Ok(Subscription::new(table, filter, self.changes.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::patch;
    use serde_json::json;

    fn gateway() -> SqliteGateway {
        SqliteGateway::open_in_memory("test-secret").expect("open gateway")
    }

    fn row(value: Value) -> Row {
        match value {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_insert_generates_missing_ids() {
        let gw = gateway();
        let stored = gw
            .insert("clients", vec![row(json!({"name": "Acme"}))])
            .await
            .unwrap();
        let id = stored[0]["id"].as_str().unwrap();
        assert!(!id.is_empty());

        let fetched = gw.select("clients", &Filter::eq("id", id)).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0]["name"], json!("Acme"));
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let gw = gateway();
        gw.insert("clients", vec![row(json!({"id": "c1"}))])
            .await
            .unwrap();
        let dup = gw.insert("clients", vec![row(json!({"id": "c1"}))]).await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn test_tables_are_isolated() {
        let gw = gateway();
        gw.insert("clients", vec![row(json!({"id": "x"}))])
            .await
            .unwrap();
        gw.insert("employees", vec![row(json!({"id": "x"}))])
            .await
            .unwrap();
        assert_eq!(gw.select("clients", &Filter::All).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_merges_patch_and_keeps_id() {
        let gw = gateway();
        gw.insert(
            "clients",
            vec![row(json!({"id": "c1", "status": "ongoing", "name": "Acme"}))],
        )
        .await
        .unwrap();

        let updated = gw
            .update(
                "clients",
                &Filter::eq("id", "c1"),
                patch([("status", json!("completed")), ("id", json!("hijack"))]),
            )
            .await
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["status"], json!("completed"));
        assert_eq!(updated[0]["id"], json!("c1"));
        assert_eq!(updated[0]["name"], json!("Acme"));
    }

    #[tokio::test]
    async fn test_delete_returns_removed_rows() {
        let gw = gateway();
        gw.insert(
            "notifications",
            vec![
                row(json!({"id": "n1", "assigned_to": "e1"})),
                row(json!({"id": "n2", "assigned_to": "e2"})),
            ],
        )
        .await
        .unwrap();

        let removed = gw
            .delete("notifications", &Filter::eq("assigned_to", "e1"))
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0]["id"], json!("n1"));
        assert_eq!(gw.select("notifications", &Filter::All).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_subscription_receives_filtered_events() {
        let gw = gateway();
        let mut sub = gw
            .subscribe("notifications", Filter::eq("assigned_to", "e1"))
            .await
            .unwrap();

        gw.insert("notifications", vec![row(json!({"id": "other", "assigned_to": "e2"}))])
            .await
            .unwrap();
        gw.insert("clients", vec![row(json!({"id": "c", "assigned_to": "e1"}))])
            .await
            .unwrap();
        gw.insert("notifications", vec![row(json!({"id": "mine", "assigned_to": "e1"}))])
            .await
            .unwrap();
        gw.delete("notifications", &Filter::eq("id", "mine"))
            .await
            .unwrap();

        match sub.next().await {
            Some(ChangeEvent::Insert { new, .. }) => assert_eq!(new["id"], json!("mine")),
            other => panic!("unexpected event: {:?}", other),
        }
        match sub.next().await {
            Some(ChangeEvent::Delete { old, .. }) => assert_eq!(old["id"], json!("mine")),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_storage_round_trip_and_remove() {
        let gw = gateway();
        gw.upload("documents", "clients/c1/plan.pdf", b"%PDF".to_vec(), "application/pdf")
            .await
            .unwrap();
        assert_eq!(
            gw.download("documents", "clients/c1/plan.pdf").await.unwrap(),
            b"%PDF".to_vec()
        );
        assert_eq!(
            gw.public_url("documents", "clients/c1/plan.pdf"),
            "local://documents/clients/c1/plan.pdf"
        );

        gw.remove("documents", &["clients/c1/plan.pdf".to_string()])
            .await
            .unwrap();
        let missing = gw.download("documents", "clients/c1/plan.pdf").await;
        assert!(matches!(missing, Err(GatewayError::ObjectNotFound { .. })));
    }

    #[tokio::test]
    async fn test_signed_url_verifies_and_expires() {
        let gw = gateway();
        gw.upload("documents", "a.pdf", vec![1, 2, 3], "application/pdf")
            .await
            .unwrap();
        let signed = gw
            .signed_url("documents", "a.pdf", Duration::from_secs(60))
            .await
            .unwrap();

        let now = Utc::now().timestamp();
        assert!(gw.verify_signed_url(&signed, now));
        assert!(!gw.verify_signed_url(&signed, now + 3600), "expired");
        assert!(!gw.verify_signed_url(&signed.replace("token=", "token=0"), now));

        let other = SqliteGateway::open_in_memory("different").unwrap();
        assert!(!other.verify_signed_url(&signed, now), "wrong secret");
    }

    #[tokio::test]
    async fn test_signed_url_with_non_ascii_path_verifies() {
        let gw = gateway();
        let path = "clients/c1/смета-объекта.pdf";
        gw.upload("documents", path, vec![1], "application/pdf")
            .await
            .unwrap();
        let signed = gw
            .signed_url("documents", path, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(signed.is_ascii());
        assert!(gw.verify_signed_url(&signed, Utc::now().timestamp()));
    }

    #[tokio::test]
    async fn test_signed_url_rejects_out_of_range_lifetime() {
        let gw = gateway();
        gw.upload("documents", "a.pdf", vec![1], "application/pdf")
            .await
            .unwrap();
        for secs in [u64::MAX, i64::MAX as u64] {
            let err = gw
                .signed_url("documents", "a.pdf", Duration::from_secs(secs))
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::Configuration(_)), "{}s", secs);
        }
    }

    #[tokio::test]
    async fn test_signed_url_for_missing_object_fails() {
        let gw = gateway();
        let err = gw
            .signed_url("documents", "nope.pdf", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ObjectNotFound { .. }));
    }

    #[test]
    fn test_open_at_creates_parent_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("sitedesk.db");
        SqliteGateway::open_at(path.clone(), "s").expect("open");
        assert!(path.exists());
    }
}
