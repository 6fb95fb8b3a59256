//! Durable store for the plugin subsystem.
//!
//! Synchronous-feeling CRUD over SQLite: installed plugins, per-plugin config
//! (with secret masking), global and per-library hook orderings, field
//! settings, identifier-type registrations, and repository records. Writes
//! touching multiple rows run in a single transaction.

use crate::error::{PluginError, PluginResult};
use crate::plugins::host::ConfigGetter;
use crate::plugins::manifest::{ConfigField, IdentifierTypeDecl};
use crate::plugins::HookType;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Value used in place of secret config values on non-raw reads.
pub const SECRET_MASK: &str = "***";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS plugins (
        scope TEXT NOT NULL,
        id TEXT NOT NULL,
        name TEXT NOT NULL,
        version TEXT NOT NULL,
        description TEXT,
        installed_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 0,
        load_error TEXT,
        update_available_version TEXT,
        PRIMARY KEY (scope, id)
    )",
    "CREATE TABLE IF NOT EXISTS plugin_config (
        scope TEXT NOT NULL,
        plugin_id TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT,
        PRIMARY KEY (scope, plugin_id, key)
    )",
    "CREATE TABLE IF NOT EXISTS plugin_order (
        hook_type TEXT NOT NULL,
        scope TEXT NOT NULL,
        plugin_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (hook_type, scope, plugin_id)
    )",
    "CREATE TABLE IF NOT EXISTS library_order_markers (
        library_id INTEGER NOT NULL,
        hook_type TEXT NOT NULL,
        PRIMARY KEY (library_id, hook_type)
    )",
    "CREATE TABLE IF NOT EXISTS library_order (
        library_id INTEGER NOT NULL,
        hook_type TEXT NOT NULL,
        scope TEXT NOT NULL,
        plugin_id TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        position INTEGER NOT NULL,
        PRIMARY KEY (library_id, hook_type, scope, plugin_id)
    )",
    "CREATE TABLE IF NOT EXISTS field_settings (
        scope TEXT NOT NULL,
        plugin_id TEXT NOT NULL,
        field TEXT NOT NULL,
        enabled INTEGER NOT NULL,
        PRIMARY KEY (scope, plugin_id, field)
    )",
    "CREATE TABLE IF NOT EXISTS library_field_settings (
        library_id INTEGER NOT NULL,
        scope TEXT NOT NULL,
        plugin_id TEXT NOT NULL,
        field TEXT NOT NULL,
        enabled INTEGER NOT NULL,
        PRIMARY KEY (library_id, scope, plugin_id, field)
    )",
    "CREATE TABLE IF NOT EXISTS identifier_types (
        scope TEXT NOT NULL,
        plugin_id TEXT NOT NULL,
        id TEXT NOT NULL,
        name TEXT NOT NULL,
        url_template TEXT,
        pattern TEXT,
        PRIMARY KEY (scope, plugin_id, id)
    )",
    "CREATE TABLE IF NOT EXISTS repositories (
        scope TEXT NOT NULL PRIMARY KEY,
        url TEXT NOT NULL,
        name TEXT,
        is_official INTEGER NOT NULL DEFAULT 0,
        enabled INTEGER NOT NULL DEFAULT 1,
        last_fetched_at TEXT,
        fetch_error TEXT
    )",
];

/// Installed-plugin row.
#[derive(Debug, Clone)]
pub struct PluginRecord {
    pub scope: String,
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub enabled: bool,
    pub load_error: Option<String>,
    pub update_available_version: Option<String>,
}

/// One entry of a global hook order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderEntry {
    pub scope: String,
    pub plugin_id: String,
    pub position: i64,
}

/// One entry of a per-library hook order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryOrderEntry {
    pub scope: String,
    pub plugin_id: String,
    pub enabled: bool,
    pub position: i64,
}

/// Plugin-contributed identifier type row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierTypeRecord {
    pub scope: String,
    pub plugin_id: String,
    pub id: String,
    pub name: String,
    pub url_template: Option<String>,
    pub pattern: Option<String>,
}

/// Configured plugin repository row.
#[derive(Debug, Clone)]
pub struct RepositoryRecord {
    pub scope: String,
    pub url: String,
    pub name: Option<String>,
    pub is_official: bool,
    pub enabled: bool,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub fetch_error: Option<String>,
}

/// The plugin subsystem's durable store.
#[derive(Clone)]
pub struct PluginService {
    pool: SqlitePool,
}

fn plugin_record(row: &sqlx::sqlite::SqliteRow) -> PluginRecord {
    PluginRecord {
        scope: row.get("scope"),
        id: row.get("id"),
        name: row.get("name"),
        version: row.get("version"),
        description: row.get("description"),
        installed_at: row.get("installed_at"),
        updated_at: row.get("updated_at"),
        enabled: row.get("enabled"),
        load_error: row.get("load_error"),
        update_available_version: row.get("update_available_version"),
    }
}

impl PluginService {
    /// Wrap an existing pool and ensure the schema exists.
    pub async fn new(pool: SqlitePool) -> PluginResult<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Open (creating if missing) a file-backed store.
    pub async fn open(path: &Path) -> PluginResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::new(pool).await
    }

    /// In-memory store; one connection so all queries share the database.
    pub async fn open_in_memory() -> PluginResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::new(pool).await
    }

    // ── plugins ──────────────────────────────────────────────────────────

    /// Create or replace the installed-plugin row.
    pub async fn install_plugin(&self, record: &PluginRecord) -> PluginResult<()> {
        sqlx::query(
            "INSERT INTO plugins (scope, id, name, version, description, installed_at, updated_at,
                                  enabled, load_error, update_available_version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (scope, id) DO UPDATE SET
                 name = excluded.name,
                 version = excluded.version,
                 description = excluded.description,
                 updated_at = excluded.updated_at,
                 enabled = excluded.enabled,
                 load_error = excluded.load_error,
                 update_available_version = excluded.update_available_version",
        )
        .bind(&record.scope)
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.version)
        .bind(&record.description)
        .bind(record.installed_at)
        .bind(record.updated_at)
        .bind(record.enabled)
        .bind(&record.load_error)
        .bind(&record.update_available_version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All installed plugins, ordered by scope then id.
    pub async fn list_plugins(&self) -> PluginResult<Vec<PluginRecord>> {
        let rows = sqlx::query("SELECT * FROM plugins ORDER BY scope, id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(plugin_record).collect())
    }

    /// One installed plugin, if present.
    pub async fn get_plugin(&self, scope: &str, id: &str) -> PluginResult<Option<PluginRecord>> {
        let row = sqlx::query("SELECT * FROM plugins WHERE scope = ? AND id = ?")
            .bind(scope)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(plugin_record))
    }

    /// Update mutable plugin-row attributes.
    pub async fn update_plugin(&self, record: &PluginRecord) -> PluginResult<()> {
        sqlx::query(
            "UPDATE plugins SET name = ?, version = ?, description = ?, updated_at = ?,
                                enabled = ?, load_error = ?, update_available_version = ?
             WHERE scope = ? AND id = ?",
        )
        .bind(&record.name)
        .bind(&record.version)
        .bind(&record.description)
        .bind(record.updated_at)
        .bind(record.enabled)
        .bind(&record.load_error)
        .bind(&record.update_available_version)
        .bind(&record.scope)
        .bind(&record.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Set or clear the enabled flag.
    pub async fn set_plugin_enabled(&self, scope: &str, id: &str, enabled: bool) -> PluginResult<()> {
        sqlx::query("UPDATE plugins SET enabled = ?, updated_at = ? WHERE scope = ? AND id = ?")
            .bind(enabled)
            .bind(Utc::now())
            .bind(scope)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record (or clear) the last load error.
    pub async fn set_load_error(
        &self,
        scope: &str,
        id: &str,
        error: Option<&str>,
    ) -> PluginResult<()> {
        sqlx::query("UPDATE plugins SET load_error = ? WHERE scope = ? AND id = ?")
            .bind(error)
            .bind(scope)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Set or clear the update-available marker.
    pub async fn set_update_available(
        &self,
        scope: &str,
        id: &str,
        version: Option<&str>,
    ) -> PluginResult<()> {
        sqlx::query("UPDATE plugins SET update_available_version = ? WHERE scope = ? AND id = ?")
            .bind(version)
            .bind(scope)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a plugin row and everything that hangs off it.
    pub async fn uninstall_plugin(&self, scope: &str, id: &str) -> PluginResult<()> {
        let mut tx = self.pool.begin().await?;
        for statement in [
            "DELETE FROM plugins WHERE scope = ? AND id = ?",
            "DELETE FROM plugin_config WHERE scope = ? AND plugin_id = ?",
            "DELETE FROM plugin_order WHERE scope = ? AND plugin_id = ?",
            "DELETE FROM library_order WHERE scope = ? AND plugin_id = ?",
            "DELETE FROM field_settings WHERE scope = ? AND plugin_id = ?",
            "DELETE FROM library_field_settings WHERE scope = ? AND plugin_id = ?",
            "DELETE FROM identifier_types WHERE scope = ? AND plugin_id = ?",
        ] {
            sqlx::query(statement)
                .bind(scope)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        info!(plugin = %format!("{scope}/{id}"), "plugin rows removed");
        Ok(())
    }

    // ── config ───────────────────────────────────────────────────────────

    /// All config values for a plugin, masking secrets unless `raw`.
    ///
    /// Schema defaults fill keys with no stored value.
    pub async fn get_config(
        &self,
        scope: &str,
        plugin_id: &str,
        schema: &BTreeMap<String, ConfigField>,
        raw: bool,
    ) -> PluginResult<BTreeMap<String, String>> {
        let mut values: BTreeMap<String, String> = schema
            .iter()
            .filter_map(|(key, field)| field.default.clone().map(|d| (key.clone(), d)))
            .collect();

        let rows = sqlx::query(
            "SELECT key, value FROM plugin_config WHERE scope = ? AND plugin_id = ?",
        )
        .bind(scope)
        .bind(plugin_id)
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let key: String = row.get("key");
            match row.get::<Option<String>, _>("value") {
                Some(value) => {
                    values.insert(key, value);
                }
                None => {
                    values.remove(&key);
                }
            }
        }

        if !raw {
            for (key, value) in values.iter_mut() {
                let secret = schema.get(key).map_or(false, |f| f.secret);
                if secret && !value.is_empty() {
                    *value = SECRET_MASK.to_string();
                }
            }
        }
        Ok(values)
    }

    /// Upsert one config value, validating against the schema entry if given.
    pub async fn set_config(
        &self,
        scope: &str,
        plugin_id: &str,
        key: &str,
        value: Option<&str>,
        schema: Option<&ConfigField>,
    ) -> PluginResult<()> {
        if let (Some(field), Some(value)) = (schema, value) {
            field.validate(key, value)?;
        }
        sqlx::query(
            "INSERT INTO plugin_config (scope, plugin_id, key, value) VALUES (?, ?, ?, ?)
             ON CONFLICT (scope, plugin_id, key) DO UPDATE SET value = excluded.value",
        )
        .bind(scope)
        .bind(plugin_id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// One raw config value, unmasked. Used by the `shisho.config` host API.
    pub async fn get_config_raw(
        &self,
        scope: &str,
        plugin_id: &str,
        key: &str,
    ) -> PluginResult<Option<String>> {
        let row = sqlx::query(
            "SELECT value FROM plugin_config WHERE scope = ? AND plugin_id = ? AND key = ?",
        )
        .bind(scope)
        .bind(plugin_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|r| r.get::<Option<String>, _>("value")))
    }

    // ── global order ─────────────────────────────────────────────────────

    /// Global order for a hook type, sorted by position.
    pub async fn get_order(&self, hook: HookType) -> PluginResult<Vec<OrderEntry>> {
        let rows = sqlx::query(
            "SELECT scope, plugin_id, position FROM plugin_order
             WHERE hook_type = ? ORDER BY position",
        )
        .bind(hook.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| OrderEntry {
                scope: row.get("scope"),
                plugin_id: row.get("plugin_id"),
                position: row.get("position"),
            })
            .collect())
    }

    /// Replace the global order in one transaction, positions 0..n-1.
    pub async fn set_order(&self, hook: HookType, entries: &[(String, String)]) -> PluginResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM plugin_order WHERE hook_type = ?")
            .bind(hook.as_str())
            .execute(&mut *tx)
            .await?;
        for (position, (scope, plugin_id)) in entries.iter().enumerate() {
            sqlx::query(
                "INSERT INTO plugin_order (hook_type, scope, plugin_id, position) VALUES (?, ?, ?, ?)",
            )
            .bind(hook.as_str())
            .bind(scope)
            .bind(plugin_id)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Append a plugin at `MAX(position) + 1`; duplicate inserts are ignored.
    pub async fn append_to_order(
        &self,
        hook: HookType,
        scope: &str,
        plugin_id: &str,
    ) -> PluginResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO plugin_order (hook_type, scope, plugin_id, position)
             SELECT ?1, ?2, ?3, COALESCE(MAX(position) + 1, 0)
             FROM plugin_order WHERE hook_type = ?1",
        )
        .bind(hook.as_str())
        .bind(scope)
        .bind(plugin_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── per-library order ────────────────────────────────────────────────

    /// Whether a library overrides the global order for this hook type.
    pub async fn is_library_customized(&self, library_id: i64, hook: HookType) -> PluginResult<bool> {
        let row = sqlx::query(
            "SELECT 1 AS present FROM library_order_markers WHERE library_id = ? AND hook_type = ?",
        )
        .bind(library_id)
        .bind(hook.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// A library's order entries, sorted by position.
    pub async fn get_library_order(
        &self,
        library_id: i64,
        hook: HookType,
    ) -> PluginResult<Vec<LibraryOrderEntry>> {
        let rows = sqlx::query(
            "SELECT scope, plugin_id, enabled, position FROM library_order
             WHERE library_id = ? AND hook_type = ? ORDER BY position",
        )
        .bind(library_id)
        .bind(hook.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| LibraryOrderEntry {
                scope: row.get("scope"),
                plugin_id: row.get("plugin_id"),
                enabled: row.get("enabled"),
                position: row.get("position"),
            })
            .collect())
    }

    /// Mark the library customised and replace its entries, atomically.
    pub async fn set_library_order(
        &self,
        library_id: i64,
        hook: HookType,
        entries: &[(String, String, bool)],
    ) -> PluginResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT OR IGNORE INTO library_order_markers (library_id, hook_type) VALUES (?, ?)",
        )
        .bind(library_id)
        .bind(hook.as_str())
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM library_order WHERE library_id = ? AND hook_type = ?")
            .bind(library_id)
            .bind(hook.as_str())
            .execute(&mut *tx)
            .await?;
        for (position, (scope, plugin_id, enabled)) in entries.iter().enumerate() {
            sqlx::query(
                "INSERT INTO library_order (library_id, hook_type, scope, plugin_id, enabled, position)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(library_id)
            .bind(hook.as_str())
            .bind(scope)
            .bind(plugin_id)
            .bind(enabled)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Drop a library's customisation for one hook type.
    pub async fn reset_library_order(&self, library_id: i64, hook: HookType) -> PluginResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM library_order_markers WHERE library_id = ? AND hook_type = ?")
            .bind(library_id)
            .bind(hook.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM library_order WHERE library_id = ? AND hook_type = ?")
            .bind(library_id)
            .bind(hook.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Drop every customisation a library holds.
    pub async fn reset_all_library_orders(&self, library_id: i64) -> PluginResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM library_order_markers WHERE library_id = ?")
            .bind(library_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM library_order WHERE library_id = ?")
            .bind(library_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // ── field settings ───────────────────────────────────────────────────

    /// Explicit global field rows; a missing field means enabled.
    pub async fn get_field_settings(
        &self,
        scope: &str,
        plugin_id: &str,
    ) -> PluginResult<BTreeMap<String, bool>> {
        let rows = sqlx::query(
            "SELECT field, enabled FROM field_settings WHERE scope = ? AND plugin_id = ?",
        )
        .bind(scope)
        .bind(plugin_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("field"), row.get("enabled")))
            .collect())
    }

    /// Global setting: enabled deletes the row, disabled upserts it.
    pub async fn set_field_setting(
        &self,
        scope: &str,
        plugin_id: &str,
        field: &str,
        enabled: bool,
    ) -> PluginResult<()> {
        if enabled {
            sqlx::query(
                "DELETE FROM field_settings WHERE scope = ? AND plugin_id = ? AND field = ?",
            )
            .bind(scope)
            .bind(plugin_id)
            .bind(field)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "INSERT INTO field_settings (scope, plugin_id, field, enabled) VALUES (?, ?, ?, 0)
                 ON CONFLICT (scope, plugin_id, field) DO UPDATE SET enabled = 0",
            )
            .bind(scope)
            .bind(plugin_id)
            .bind(field)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Library override rows; stored for either value.
    pub async fn get_library_field_settings(
        &self,
        library_id: i64,
        scope: &str,
        plugin_id: &str,
    ) -> PluginResult<BTreeMap<String, bool>> {
        let rows = sqlx::query(
            "SELECT field, enabled FROM library_field_settings
             WHERE library_id = ? AND scope = ? AND plugin_id = ?",
        )
        .bind(library_id)
        .bind(scope)
        .bind(plugin_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("field"), row.get("enabled")))
            .collect())
    }

    /// Upsert a library override for one field.
    pub async fn set_library_field_setting(
        &self,
        library_id: i64,
        scope: &str,
        plugin_id: &str,
        field: &str,
        enabled: bool,
    ) -> PluginResult<()> {
        sqlx::query(
            "INSERT INTO library_field_settings (library_id, scope, plugin_id, field, enabled)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (library_id, scope, plugin_id, field) DO UPDATE SET enabled = excluded.enabled",
        )
        .bind(library_id)
        .bind(scope)
        .bind(plugin_id)
        .bind(field)
        .bind(enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Effective per-library map over `declared_fields`:
    /// library override > global disable > default enabled.
    pub async fn get_effective_field_settings(
        &self,
        library_id: i64,
        scope: &str,
        plugin_id: &str,
        declared_fields: &[String],
    ) -> PluginResult<BTreeMap<String, bool>> {
        let global = self.get_field_settings(scope, plugin_id).await?;
        let library = self
            .get_library_field_settings(library_id, scope, plugin_id)
            .await?;
        Ok(declared_fields
            .iter()
            .map(|field| {
                let effective = library
                    .get(field)
                    .or_else(|| global.get(field))
                    .copied()
                    .unwrap_or(true);
                (field.clone(), effective)
            })
            .collect())
    }

    // ── identifier types ─────────────────────────────────────────────────

    /// Replace a plugin's identifier-type set, atomically.
    pub async fn upsert_identifier_types(
        &self,
        scope: &str,
        plugin_id: &str,
        types: &[IdentifierTypeDecl],
    ) -> PluginResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM identifier_types WHERE scope = ? AND plugin_id = ?")
            .bind(scope)
            .bind(plugin_id)
            .execute(&mut *tx)
            .await?;
        for declared in types {
            sqlx::query(
                "INSERT INTO identifier_types (scope, plugin_id, id, name, url_template, pattern)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(scope)
            .bind(plugin_id)
            .bind(&declared.id)
            .bind(&declared.name)
            .bind(&declared.url_template)
            .bind(&declared.pattern)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// All registered identifier types.
    pub async fn list_identifier_types(&self) -> PluginResult<Vec<IdentifierTypeRecord>> {
        let rows = sqlx::query("SELECT * FROM identifier_types ORDER BY scope, plugin_id, id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| IdentifierTypeRecord {
                scope: row.get("scope"),
                plugin_id: row.get("plugin_id"),
                id: row.get("id"),
                name: row.get("name"),
                url_template: row.get("url_template"),
                pattern: row.get("pattern"),
            })
            .collect())
    }

    // ── repositories ─────────────────────────────────────────────────────

    /// All repositories: official first, then by scope.
    pub async fn list_repositories(&self) -> PluginResult<Vec<RepositoryRecord>> {
        let rows = sqlx::query("SELECT * FROM repositories ORDER BY is_official DESC, scope")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| RepositoryRecord {
                scope: row.get("scope"),
                url: row.get("url"),
                name: row.get("name"),
                is_official: row.get("is_official"),
                enabled: row.get("enabled"),
                last_fetched_at: row.get("last_fetched_at"),
                fetch_error: row.get("fetch_error"),
            })
            .collect())
    }

    /// Create or replace a repository record.
    pub async fn add_repository(&self, record: &RepositoryRecord) -> PluginResult<()> {
        sqlx::query(
            "INSERT INTO repositories (scope, url, name, is_official, enabled, last_fetched_at, fetch_error)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (scope) DO UPDATE SET
                 url = excluded.url,
                 name = excluded.name,
                 is_official = excluded.is_official,
                 enabled = excluded.enabled",
        )
        .bind(&record.scope)
        .bind(&record.url)
        .bind(&record.name)
        .bind(record.is_official)
        .bind(record.enabled)
        .bind(record.last_fetched_at)
        .bind(&record.fetch_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record the outcome of a repository fetch.
    pub async fn set_repository_fetch_status(
        &self,
        scope: &str,
        fetched_at: Option<DateTime<Utc>>,
        fetch_error: Option<&str>,
    ) -> PluginResult<()> {
        sqlx::query("UPDATE repositories SET last_fetched_at = ?, fetch_error = ? WHERE scope = ?")
            .bind(fetched_at)
            .bind(fetch_error)
            .bind(scope)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove a repository; official entries are refused.
    pub async fn remove_repository(&self, scope: &str) -> PluginResult<()> {
        let row = sqlx::query("SELECT is_official FROM repositories WHERE scope = ?")
            .bind(scope)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            None => Err(PluginError::NotFound(format!("repository '{scope}'"))),
            Some(row) if row.get::<bool, _>("is_official") => Err(PluginError::AccessDenied(
                format!("official repository '{scope}' cannot be removed"),
            )),
            Some(_) => {
                sqlx::query("DELETE FROM repositories WHERE scope = ?")
                    .bind(scope)
                    .execute(&self.pool)
                    .await?;
                Ok(())
            }
        }
    }
}

#[async_trait::async_trait]
impl ConfigGetter for PluginService {
    async fn get_value(
        &self,
        scope: &str,
        plugin_id: &str,
        key: &str,
    ) -> PluginResult<Option<String>> {
        self.get_config_raw(scope, plugin_id, key).await
    }

    async fn get_all(
        &self,
        scope: &str,
        plugin_id: &str,
    ) -> PluginResult<BTreeMap<String, String>> {
        let rows = sqlx::query(
            "SELECT key, value FROM plugin_config WHERE scope = ? AND plugin_id = ? AND value IS NOT NULL",
        )
        .bind(scope)
        .bind(plugin_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("key"), row.get::<String, _>("value")))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::manifest::ConfigFieldType;

    fn record(scope: &str, id: &str) -> PluginRecord {
        PluginRecord {
            scope: scope.to_string(),
            id: id.to_string(),
            name: id.to_string(),
            version: "1.0.0".to_string(),
            description: None,
            installed_at: Utc::now(),
            updated_at: Utc::now(),
            enabled: true,
            load_error: None,
            update_available_version: None,
        }
    }

    #[tokio::test]
    async fn plugin_crud_and_cascade() {
        let service = PluginService::open_in_memory().await.unwrap();
        service.install_plugin(&record("community", "a")).await.unwrap();
        service
            .set_config("community", "a", "token", Some("x"), None)
            .await
            .unwrap();
        service
            .append_to_order(HookType::FileParser, "community", "a")
            .await
            .unwrap();
        service
            .set_field_setting("community", "a", "title", false)
            .await
            .unwrap();

        assert!(service.get_plugin("community", "a").await.unwrap().is_some());
        service.uninstall_plugin("community", "a").await.unwrap();
        assert!(service.get_plugin("community", "a").await.unwrap().is_none());
        assert!(service
            .get_config_raw("community", "a", "token")
            .await
            .unwrap()
            .is_none());
        assert!(service.get_order(HookType::FileParser).await.unwrap().is_empty());
        assert!(service
            .get_field_settings("community", "a")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn load_error_round_trip() {
        let service = PluginService::open_in_memory().await.unwrap();
        service.install_plugin(&record("community", "a")).await.unwrap();
        service
            .set_load_error("community", "a", Some("ScriptInit: boom"))
            .await
            .unwrap();
        let plugin = service.get_plugin("community", "a").await.unwrap().unwrap();
        assert_eq!(plugin.load_error.as_deref(), Some("ScriptInit: boom"));
        service.set_load_error("community", "a", None).await.unwrap();
        let plugin = service.get_plugin("community", "a").await.unwrap().unwrap();
        assert!(plugin.load_error.is_none());
    }

    #[tokio::test]
    async fn secret_masking() {
        let service = PluginService::open_in_memory().await.unwrap();
        let mut schema = BTreeMap::new();
        schema.insert(
            "apiKey".to_string(),
            ConfigField {
                secret: true,
                ..ConfigField::default()
            },
        );
        schema.insert("plain".to_string(), ConfigField::default());

        service
            .set_config("s", "p", "apiKey", Some("hunter2"), schema.get("apiKey"))
            .await
            .unwrap();
        service
            .set_config("s", "p", "plain", Some("visible"), schema.get("plain"))
            .await
            .unwrap();

        let masked = service.get_config("s", "p", &schema, false).await.unwrap();
        assert_eq!(masked.get("apiKey").map(String::as_str), Some(SECRET_MASK));
        assert_eq!(masked.get("plain").map(String::as_str), Some("visible"));

        let raw = service.get_config("s", "p", &schema, true).await.unwrap();
        assert_eq!(raw.get("apiKey").map(String::as_str), Some("hunter2"));
    }

    #[tokio::test]
    async fn config_defaults_and_validation() {
        let service = PluginService::open_in_memory().await.unwrap();
        let mut schema = BTreeMap::new();
        schema.insert(
            "pageSize".to_string(),
            ConfigField {
                field_type: ConfigFieldType::Number,
                default: Some("25".to_string()),
                min: Some(1.0),
                max: Some(100.0),
                ..ConfigField::default()
            },
        );

        let values = service.get_config("s", "p", &schema, true).await.unwrap();
        assert_eq!(values.get("pageSize").map(String::as_str), Some("25"));

        let err = service
            .set_config("s", "p", "pageSize", Some("500"), schema.get("pageSize"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ManifestInvalid");

        service
            .set_config("s", "p", "pageSize", Some("50"), schema.get("pageSize"))
            .await
            .unwrap();
        let values = service.get_config("s", "p", &schema, true).await.unwrap();
        assert_eq!(values.get("pageSize").map(String::as_str), Some("50"));
    }

    #[tokio::test]
    async fn order_set_and_append() {
        let service = PluginService::open_in_memory().await.unwrap();
        let hook = HookType::MetadataEnricher;

        service.append_to_order(hook, "s", "a").await.unwrap();
        service.append_to_order(hook, "s", "b").await.unwrap();
        // duplicate append is swallowed
        service.append_to_order(hook, "s", "a").await.unwrap();

        let order = service.get_order(hook).await.unwrap();
        assert_eq!(order.len(), 2);
        assert_eq!(order[0].plugin_id, "a");
        assert_eq!(order[1].plugin_id, "b");
        assert_eq!(order[1].position, 1);

        service
            .set_order(hook, &[("s".into(), "b".into()), ("s".into(), "a".into())])
            .await
            .unwrap();
        let order = service.get_order(hook).await.unwrap();
        assert_eq!(order[0].plugin_id, "b");
        assert_eq!(order[0].position, 0);
        assert_eq!(order[1].plugin_id, "a");
        assert_eq!(order[1].position, 1);
    }

    #[tokio::test]
    async fn library_order_override_lifecycle() {
        let service = PluginService::open_in_memory().await.unwrap();
        let hook = HookType::MetadataEnricher;

        assert!(!service.is_library_customized(7, hook).await.unwrap());
        service
            .set_library_order(
                7,
                hook,
                &[("s".into(), "b".into(), true), ("s".into(), "a".into(), false)],
            )
            .await
            .unwrap();
        assert!(service.is_library_customized(7, hook).await.unwrap());

        let entries = service.get_library_order(7, hook).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].enabled);
        assert!(!entries[1].enabled);

        service.reset_library_order(7, hook).await.unwrap();
        assert!(!service.is_library_customized(7, hook).await.unwrap());
        assert!(service.get_library_order(7, hook).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn effective_field_settings_priority() {
        let service = PluginService::open_in_memory().await.unwrap();
        let declared = vec!["title".to_string(), "tags".to_string(), "cover".to_string()];

        // global disable for title; library re-enables it, disables tags
        service.set_field_setting("s", "p", "title", false).await.unwrap();
        service
            .set_library_field_setting(3, "s", "p", "title", true)
            .await
            .unwrap();
        service
            .set_library_field_setting(3, "s", "p", "tags", false)
            .await
            .unwrap();

        let effective = service
            .get_effective_field_settings(3, "s", "p", &declared)
            .await
            .unwrap();
        assert_eq!(effective["title"], true);
        assert_eq!(effective["tags"], false);
        assert_eq!(effective["cover"], true);

        // a different library only sees the global disable
        let other = service
            .get_effective_field_settings(4, "s", "p", &declared)
            .await
            .unwrap();
        assert_eq!(other["title"], false);
        assert_eq!(other["tags"], true);

        // re-enabling globally deletes the row
        service.set_field_setting("s", "p", "title", true).await.unwrap();
        assert!(service.get_field_settings("s", "p").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn identifier_types_replace_atomically() {
        let service = PluginService::open_in_memory().await.unwrap();
        let first = vec![IdentifierTypeDecl {
            id: "isbn".into(),
            name: "ISBN".into(),
            url_template: None,
            pattern: Some(r"^\d{13}$".into()),
        }];
        service.upsert_identifier_types("s", "p", &first).await.unwrap();

        let second = vec![IdentifierTypeDecl {
            id: "goodreads".into(),
            name: "Goodreads ID".into(),
            url_template: Some("https://goodreads.com/book/show/{value}".into()),
            pattern: None,
        }];
        service.upsert_identifier_types("s", "p", &second).await.unwrap();

        let types = service.list_identifier_types().await.unwrap();
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].id, "goodreads");
    }

    #[tokio::test]
    async fn repositories_official_rules() {
        let service = PluginService::open_in_memory().await.unwrap();
        service
            .add_repository(&RepositoryRecord {
                scope: "community".into(),
                url: "https://raw.githubusercontent.com/x/community.json".into(),
                name: None,
                is_official: false,
                enabled: true,
                last_fetched_at: None,
                fetch_error: None,
            })
            .await
            .unwrap();
        service
            .add_repository(&RepositoryRecord {
                scope: "official".into(),
                url: "https://raw.githubusercontent.com/x/official.json".into(),
                name: Some("Official".into()),
                is_official: true,
                enabled: true,
                last_fetched_at: None,
                fetch_error: None,
            })
            .await
            .unwrap();

        let repositories = service.list_repositories().await.unwrap();
        assert_eq!(repositories[0].scope, "official");
        assert_eq!(repositories[1].scope, "community");

        let err = service.remove_repository("official").await.unwrap_err();
        assert_eq!(err.kind(), "AccessDenied");
        service.remove_repository("community").await.unwrap();
        assert_eq!(service.list_repositories().await.unwrap().len(), 1);
    }
}
