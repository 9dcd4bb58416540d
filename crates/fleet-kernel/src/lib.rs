use std::path::{Path, PathBuf};
use std::str::FromStr;

use fleet_core::{
    transition, Action, Catalog, InstallStatus, Installation, Outcome, ParseLabelError, Plugin,
    PluginVersion, Site, SiteStatus,
};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::json;

mod error;

pub use error::{Result, StoreError};

/// SQLite-backed desired-state store. Cheap to clone; each call opens its
/// own connection so handles can move into blocking tasks.
#[derive(Clone)]
pub struct Kernel {
    db_path: PathBuf,
    busy_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EventRow {
    pub id: i64,
    pub time: String,
    pub kind: String,
    pub site_id: Option<String>,
    pub installation_id: Option<String>,
    pub payload: serde_json::Value,
}

/// Consistent read of everything the reconciler needs for one site.
#[derive(Debug, Clone)]
pub struct SiteSnapshot {
    pub installations: Vec<Installation>,
    pub catalog: Catalog,
}

const SITE_COLS: &str = "id,name,url,api_key,status,last_seen";
const PLUGIN_COLS: &str = "id,slug,name,owner";
const VERSION_COLS: &str = "id,plugin_id,version,file_url";
const INSTALL_COLS: &str = "id,site_id,plugin_id,version_id,status,is_enabled,is_active,installed_version,last_sync,error_message";

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn parse_label<T>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T: FromStr<Err = ParseLabelError>,
{
    raw.parse().map_err(|err: ParseLabelError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
    })
}

fn site_from_row(row: &Row<'_>) -> rusqlite::Result<Site> {
    Ok(Site {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        api_key: row.get(3)?,
        status: parse_label(4, row.get(4)?)?,
        last_seen: row.get(5)?,
    })
}

fn plugin_from_row(row: &Row<'_>) -> rusqlite::Result<Plugin> {
    Ok(Plugin {
        id: row.get(0)?,
        slug: row.get(1)?,
        name: row.get(2)?,
        owner: row.get(3)?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<PluginVersion> {
    Ok(PluginVersion {
        id: row.get(0)?,
        plugin_id: row.get(1)?,
        version: row.get(2)?,
        file_url: row.get(3)?,
    })
}

fn installation_from_row(row: &Row<'_>) -> rusqlite::Result<Installation> {
    Ok(Installation {
        id: row.get(0)?,
        site_id: row.get(1)?,
        plugin_id: row.get(2)?,
        version_id: row.get(3)?,
        status: parse_label(4, row.get(4)?)?,
        is_enabled: row.get(5)?,
        is_active: row.get(6)?,
        installed_version: row.get(7)?,
        last_sync: row.get(8)?,
        error_message: row.get(9)?,
    })
}

impl Kernel {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| StoreError::Invalid(format!("create {}: {e}", dir.display())))?;
        let db_path = dir.join("fleet.sqlite");
        // Busy timeout (default 5000ms; override with FLEET_SQLITE_BUSY_MS)
        let busy_ms: u64 = std::env::var("FLEET_SQLITE_BUSY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);
        let kernel = Self { db_path, busy_ms };
        let conn = kernel.conn()?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init_schema(&conn)?;
        tracing::debug!(target: "fleet::kernel", db = %kernel.db_path.display(), busy_ms, "store opened");
        Ok(kernel)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sites (
              id TEXT PRIMARY KEY,
              name TEXT,
              url TEXT NOT NULL,
              api_key TEXT NOT NULL UNIQUE,
              status TEXT NOT NULL,       -- active | error | unknown
              last_seen TEXT,
              created TEXT NOT NULL,
              updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS plugins (
              id TEXT PRIMARY KEY,
              slug TEXT NOT NULL,
              name TEXT NOT NULL,
              owner TEXT NOT NULL,        -- user or team id
              created TEXT NOT NULL,
              UNIQUE(owner, slug)
            );

            -- Versions are immutable; a new upload is a new row
            CREATE TABLE IF NOT EXISTS plugin_versions (
              id TEXT PRIMARY KEY,
              plugin_id TEXT NOT NULL REFERENCES plugins(id),
              version TEXT NOT NULL,
              file_url TEXT NOT NULL,
              created TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_versions_plugin ON plugin_versions(plugin_id);

            -- Desired/observed state per (site, plugin)
            CREATE TABLE IF NOT EXISTS plugin_installations (
              id TEXT PRIMARY KEY,
              site_id TEXT NOT NULL REFERENCES sites(id),
              plugin_id TEXT NOT NULL REFERENCES plugins(id),
              version_id TEXT NOT NULL REFERENCES plugin_versions(id),
              status TEXT NOT NULL,       -- pending | active | inactive | available | error
              is_enabled INTEGER NOT NULL,
              is_active INTEGER NOT NULL,
              installed_version TEXT,
              last_sync TEXT,
              error_message TEXT,
              created TEXT NOT NULL,
              updated TEXT NOT NULL,
              UNIQUE(site_id, plugin_id)
            );
            CREATE INDEX IF NOT EXISTS idx_installations_site ON plugin_installations(site_id);

            -- Activity journal: append-only record of issued and applied commands
            CREATE TABLE IF NOT EXISTS events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              time TEXT NOT NULL,
              kind TEXT NOT NULL,
              site_id TEXT,
              installation_id TEXT,
              payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind);
            CREATE INDEX IF NOT EXISTS idx_events_installation ON events(installation_id);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(std::time::Duration::from_millis(self.busy_ms))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    // ---------------- Sites ----------------

    pub fn insert_site(&self, url: &str, api_key: &str, name: Option<&str>) -> Result<Site> {
        let url = url.trim();
        if url.is_empty() || api_key.trim().is_empty() {
            return Err(StoreError::Invalid("site url and api key are required".into()));
        }
        let conn = self.conn()?;
        let now = now_rfc3339();
        let id = new_id();
        conn.execute(
            "INSERT INTO sites(id,name,url,api_key,status,last_seen,created,updated) VALUES(?,?,?,?,?,NULL,?,?)",
            params![id, name, url, api_key, SiteStatus::Unknown.as_str(), now, now],
        )?;
        Ok(Site {
            id,
            name: name.map(str::to_string),
            url: url.to_string(),
            api_key: api_key.to_string(),
            status: SiteStatus::Unknown,
            last_seen: None,
        })
    }

    pub fn get_site(&self, id: &str) -> Result<Option<Site>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {SITE_COLS} FROM sites WHERE id=? LIMIT 1");
        Ok(conn.query_row(&sql, [id], site_from_row).optional()?)
    }

    /// Resolve an inbound credential to exactly one site.
    pub fn find_site_by_api_key(&self, api_key: &str) -> Result<Option<Site>> {
        if api_key.is_empty() {
            return Ok(None);
        }
        let conn = self.conn()?;
        let sql = format!("SELECT {SITE_COLS} FROM sites WHERE api_key=? LIMIT 1");
        Ok(conn.query_row(&sql, [api_key], site_from_row).optional()?)
    }

    pub fn list_sites(&self) -> Result<Vec<Site>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {SITE_COLS} FROM sites ORDER BY created ASC, id ASC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], site_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Record that the site was heard from; optionally update its status.
    pub fn touch_site(&self, id: &str, status: Option<SiteStatus>) -> Result<bool> {
        let conn = self.conn()?;
        let now = now_rfc3339();
        let n = conn.execute(
            "UPDATE sites SET last_seen=?, status=COALESCE(?,status), updated=? WHERE id=?",
            params![now, status.map(SiteStatus::as_str), now, id],
        )?;
        Ok(n > 0)
    }

    // ---------------- Catalog ----------------

    pub fn insert_plugin(&self, owner: &str, slug: &str, name: &str) -> Result<Plugin> {
        let slug = slug.trim();
        if slug.is_empty() || slug.contains('/') {
            return Err(StoreError::Invalid(format!("invalid plugin slug: {slug:?}")));
        }
        let conn = self.conn()?;
        let id = new_id();
        let res = conn.execute(
            "INSERT INTO plugins(id,slug,name,owner,created) VALUES(?,?,?,?,?)",
            params![id, slug, name, owner, now_rfc3339()],
        );
        match res {
            Ok(_) => Ok(Plugin {
                id,
                slug: slug.to_string(),
                name: name.to_string(),
                owner: owner.to_string(),
            }),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Invalid(format!(
                    "plugin slug {slug} already exists for owner {owner}"
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_plugin(&self, id: &str) -> Result<Option<Plugin>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {PLUGIN_COLS} FROM plugins WHERE id=? LIMIT 1");
        Ok(conn.query_row(&sql, [id], plugin_from_row).optional()?)
    }

    pub fn insert_plugin_version(
        &self,
        plugin_id: &str,
        version: &str,
        file_url: &str,
    ) -> Result<PluginVersion> {
        if version.trim().is_empty() || file_url.trim().is_empty() {
            return Err(StoreError::Invalid("version and file_url are required".into()));
        }
        if self.get_plugin(plugin_id)?.is_none() {
            return Err(StoreError::not_found("plugin", plugin_id));
        }
        let conn = self.conn()?;
        let id = new_id();
        conn.execute(
            "INSERT INTO plugin_versions(id,plugin_id,version,file_url,created) VALUES(?,?,?,?,?)",
            params![id, plugin_id, version, file_url, now_rfc3339()],
        )?;
        Ok(PluginVersion {
            id,
            plugin_id: plugin_id.to_string(),
            version: version.to_string(),
            file_url: file_url.to_string(),
        })
    }

    pub fn get_plugin_version(&self, id: &str) -> Result<Option<PluginVersion>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {VERSION_COLS} FROM plugin_versions WHERE id=? LIMIT 1");
        Ok(conn.query_row(&sql, [id], version_from_row).optional()?)
    }

    pub fn list_plugin_versions(&self, plugin_id: &str) -> Result<Vec<PluginVersion>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {VERSION_COLS} FROM plugin_versions WHERE plugin_id=? ORDER BY created ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([plugin_id], version_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ---------------- Desired state edits ----------------
    // Owner-facing edits. Each one hands the record back to the reconciler
    // by resetting it to pending; none of them touches installed_version.

    pub fn request_installation(
        &self,
        site_id: &str,
        plugin_id: &str,
        version_id: &str,
        activate: bool,
    ) -> Result<Installation> {
        if self.get_site(site_id)?.is_none() {
            return Err(StoreError::not_found("site", site_id));
        }
        self.ensure_version_of(plugin_id, version_id)?;
        let conn = self.conn()?;
        let now = now_rfc3339();
        let id = new_id();
        let res = conn.execute(
            "INSERT INTO plugin_installations(id,site_id,plugin_id,version_id,status,is_enabled,is_active,installed_version,last_sync,error_message,created,updated)
             VALUES(?,?,?,?,?,1,?,NULL,NULL,NULL,?,?)",
            params![
                id,
                site_id,
                plugin_id,
                version_id,
                InstallStatus::Pending.as_str(),
                activate,
                now,
                now
            ],
        );
        match res {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::Invalid(format!(
                    "plugin {plugin_id} is already tracked on site {site_id}"
                )));
            }
            Err(e) => return Err(e.into()),
        }
        self.append_event_row(
            &conn,
            fleet_events::topics::TOPIC_INSTALLATION_REQUESTED,
            Some(site_id),
            Some(&id),
            &json!({"plugin_id": plugin_id, "version_id": version_id, "activate": activate}),
        )?;
        self.get_installation(&id)?
            .ok_or_else(|| StoreError::not_found("installation", &id))
    }

    fn ensure_version_of(&self, plugin_id: &str, version_id: &str) -> Result<()> {
        match self.get_plugin_version(version_id)? {
            Some(v) if v.plugin_id == plugin_id => Ok(()),
            Some(_) => Err(StoreError::Invalid(format!(
                "version {version_id} does not belong to plugin {plugin_id}"
            ))),
            None => Err(StoreError::not_found("plugin version", version_id)),
        }
    }

    pub fn set_desired_version(&self, installation_id: &str, version_id: &str) -> Result<Installation> {
        let current = self
            .get_installation(installation_id)?
            .ok_or_else(|| StoreError::not_found("installation", installation_id))?;
        self.ensure_version_of(&current.plugin_id, version_id)?;
        self.edit_desired(
            installation_id,
            "version_id=?",
            rusqlite::types::Value::Text(version_id.to_string()),
        )
    }

    pub fn set_desired_activation(&self, installation_id: &str, active: bool) -> Result<Installation> {
        self.edit_desired(
            installation_id,
            "is_active=?",
            rusqlite::types::Value::Integer(active as i64),
        )
    }

    /// Mark the plugin as unwanted on the site. The reconciler removes it
    /// if something is installed; a never-installed row goes straight to
    /// `available` so the install rule cannot pick it up.
    pub fn disable_installation(&self, installation_id: &str) -> Result<Installation> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE plugin_installations
               SET is_enabled=0,
                   status=CASE WHEN installed_version IS NULL THEN ?1 ELSE ?2 END,
                   error_message=NULL, updated=?3
             WHERE id=?4",
            params![
                InstallStatus::Available.as_str(),
                InstallStatus::Pending.as_str(),
                now_rfc3339(),
                installation_id
            ],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("installation", installation_id));
        }
        self.get_installation(installation_id)?
            .ok_or_else(|| StoreError::not_found("installation", installation_id))
    }

    fn edit_desired(
        &self,
        installation_id: &str,
        assignment: &str,
        value: rusqlite::types::Value,
    ) -> Result<Installation> {
        let conn = self.conn()?;
        let sql = format!(
            "UPDATE plugin_installations SET {assignment}, status=?, error_message=NULL, updated=? WHERE id=?"
        );
        let n = conn.execute(
            &sql,
            params![value, InstallStatus::Pending.as_str(), now_rfc3339(), installation_id],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("installation", installation_id));
        }
        self.get_installation(installation_id)?
            .ok_or_else(|| StoreError::not_found("installation", installation_id))
    }

    // ---------------- Installations ----------------

    pub fn get_installation(&self, id: &str) -> Result<Option<Installation>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {INSTALL_COLS} FROM plugin_installations WHERE id=? LIMIT 1");
        Ok(conn.query_row(&sql, [id], installation_from_row).optional()?)
    }

    pub fn list_installations(&self, site_id: Option<&str>) -> Result<Vec<Installation>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {INSTALL_COLS} FROM plugin_installations WHERE (?1 IS NULL OR site_id=?1) ORDER BY created ASC, id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([site_id], installation_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Read one site's installations and the catalog rows they reference
    /// inside a single transaction.
    pub fn site_snapshot(&self, site_id: &str) -> Result<SiteSnapshot> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let installations = {
            let sql = format!(
                "SELECT {INSTALL_COLS} FROM plugin_installations WHERE site_id=? ORDER BY created ASC, id ASC"
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map([site_id], installation_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        let plugins = {
            let sql = format!(
                "SELECT {PLUGIN_COLS} FROM plugins WHERE id IN (SELECT plugin_id FROM plugin_installations WHERE site_id=?)"
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map([site_id], plugin_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        let versions = {
            let sql = format!(
                "SELECT {VERSION_COLS} FROM plugin_versions WHERE id IN (SELECT version_id FROM plugin_installations WHERE site_id=?)"
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map([site_id], version_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.commit()?;
        Ok(SiteSnapshot {
            installations,
            catalog: Catalog::new(plugins, versions),
        })
    }

    /// Convergence writer: fold one execution outcome into the record.
    ///
    /// The write only commits while the row still carries `expected`, the
    /// status the reconciler planned from; otherwise `Conflict` is returned
    /// and nothing changes.
    pub fn apply_outcome(
        &self,
        installation_id: &str,
        expected: InstallStatus,
        action: Action,
        outcome: &Outcome,
        target_version: &str,
    ) -> Result<Installation> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let sql = format!("SELECT {INSTALL_COLS} FROM plugin_installations WHERE id=? LIMIT 1");
        let mut record = tx
            .query_row(&sql, [installation_id], installation_from_row)
            .optional()?
            .ok_or_else(|| StoreError::not_found("installation", installation_id))?;
        if record.status != expected {
            tracing::debug!(
                target: "fleet::kernel",
                installation = installation_id,
                expected = expected.as_str(),
                actual = record.status.as_str(),
                "stale outcome rejected"
            );
            return Err(StoreError::Conflict {
                id: installation_id.to_string(),
                expected,
                actual: record.status,
            });
        }

        let now = now_rfc3339();
        transition(action, outcome, target_version).apply_to(&mut record, &now);
        let n = tx.execute(
            "UPDATE plugin_installations
               SET status=?, installed_version=?, is_active=?, last_sync=?, error_message=?, updated=?
             WHERE id=? AND status=?",
            params![
                record.status.as_str(),
                record.installed_version,
                record.is_active,
                record.last_sync,
                record.error_message,
                now,
                installation_id,
                expected.as_str()
            ],
        )?;
        if n == 0 {
            return Err(StoreError::Conflict {
                id: installation_id.to_string(),
                expected,
                actual: record.status,
            });
        }

        let kind = if outcome.success {
            fleet_events::topics::TOPIC_COMMAND_APPLIED
        } else {
            fleet_events::topics::TOPIC_COMMAND_FAILED
        };
        let payload = json!({
            "action": action,
            "success": outcome.success,
            "version": outcome.version,
            "error": outcome.error,
            "failed_step": outcome.failed_step,
            "status": record.status,
        });
        self.append_event_row(&tx, kind, Some(&record.site_id), Some(installation_id), &payload)?;
        tx.commit()?;
        Ok(record)
    }

    /// Stamp `last_sync` for a command handed to the site for local
    /// execution, guarded on the planned status.
    pub fn touch_last_sync(&self, installation_id: &str, expected: InstallStatus) -> Result<bool> {
        let conn = self.conn()?;
        let now = now_rfc3339();
        let n = conn.execute(
            "UPDATE plugin_installations SET last_sync=?, updated=? WHERE id=? AND status=?",
            params![now, now, installation_id, expected.as_str()],
        )?;
        Ok(n > 0)
    }

    /// Delete rows that are disabled and no longer installed anywhere.
    /// Returns the ids removed.
    pub fn purge_removed(&self) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let doomed: Vec<(String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, site_id FROM plugin_installations WHERE is_enabled=0 AND installed_version IS NULL",
            )?;
            let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        for (id, site_id) in &doomed {
            tx.execute("DELETE FROM plugin_installations WHERE id=?", [id])?;
            self.append_event_row(
                &tx,
                fleet_events::topics::TOPIC_INSTALLATION_PURGED,
                Some(site_id),
                Some(id),
                &json!({}),
            )?;
        }
        tx.commit()?;
        if !doomed.is_empty() {
            tracing::info!(target: "fleet::kernel", purged = doomed.len(), "purged removed installations");
        }
        Ok(doomed.into_iter().map(|(id, _)| id).collect())
    }

    // ---------------- Journal ----------------

    fn append_event_row(
        &self,
        conn: &Connection,
        kind: &str,
        site_id: Option<&str>,
        installation_id: Option<&str>,
        payload: &serde_json::Value,
    ) -> Result<i64> {
        conn.execute(
            "INSERT INTO events(time,kind,site_id,installation_id,payload) VALUES (?,?,?,?,?)",
            params![
                now_rfc3339(),
                kind,
                site_id,
                installation_id,
                serde_json::to_string(payload)?
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn append_event(
        &self,
        env: &fleet_events::Envelope,
        site_id: Option<&str>,
        installation_id: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO events(time,kind,site_id,installation_id,payload) VALUES (?,?,?,?,?)",
            params![
                env.time,
                env.kind,
                site_id,
                installation_id,
                serde_json::to_string(&env.payload)?
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn recent_events(&self, limit: i64, installation_id: Option<&str>) -> Result<Vec<EventRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id,time,kind,site_id,installation_id,payload FROM events
              WHERE (?1 IS NULL OR installation_id=?1) ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![installation_id, limit], |row| {
            let payload_s: String = row.get(5)?;
            Ok(EventRow {
                id: row.get(0)?,
                time: row.get(1)?,
                kind: row.get(2)?,
                site_id: row.get(3)?,
                installation_id: row.get(4)?,
                payload: serde_json::from_str(&payload_s).unwrap_or(json!({})),
            })
        })?;
        let mut out = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        // Ascending for replay
        out.reverse();
        Ok(out)
    }

    // ---------------- Async wrappers (spawn_blocking) ----------------
    // These helpers offload rusqlite work from async executors.

    pub async fn find_site_by_api_key_async(&self, api_key: &str) -> Result<Option<Site>> {
        let k = self.clone();
        let key = api_key.to_string();
        tokio::task::spawn_blocking(move || k.find_site_by_api_key(&key))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    pub async fn touch_site_async(&self, id: &str, status: Option<SiteStatus>) -> Result<bool> {
        let k = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || k.touch_site(&id, status))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    pub async fn site_snapshot_async(&self, site_id: &str) -> Result<SiteSnapshot> {
        let k = self.clone();
        let id = site_id.to_string();
        tokio::task::spawn_blocking(move || k.site_snapshot(&id))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    pub async fn get_installation_async(&self, id: &str) -> Result<Option<Installation>> {
        let k = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || k.get_installation(&id))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    pub async fn get_plugin_version_async(&self, id: &str) -> Result<Option<PluginVersion>> {
        let k = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || k.get_plugin_version(&id))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    pub async fn apply_outcome_async(
        &self,
        installation_id: &str,
        expected: InstallStatus,
        action: Action,
        outcome: &Outcome,
        target_version: &str,
    ) -> Result<Installation> {
        let k = self.clone();
        let id = installation_id.to_string();
        let outcome = outcome.clone();
        let target = target_version.to_string();
        tokio::task::spawn_blocking(move || {
            k.apply_outcome(&id, expected, action, &outcome, &target)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    pub async fn touch_last_sync_async(
        &self,
        installation_id: &str,
        expected: InstallStatus,
    ) -> Result<bool> {
        let k = self.clone();
        let id = installation_id.to_string();
        tokio::task::spawn_blocking(move || k.touch_last_sync(&id, expected))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    pub async fn append_event_async(
        &self,
        env: &fleet_events::Envelope,
        site_id: Option<&str>,
        installation_id: Option<&str>,
    ) -> Result<i64> {
        let k = self.clone();
        let env = env.clone();
        let site_id = site_id.map(str::to_string);
        let installation_id = installation_id.map(str::to_string);
        tokio::task::spawn_blocking(move || {
            k.append_event(&env, site_id.as_deref(), installation_id.as_deref())
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}
