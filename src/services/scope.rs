/*!
 * Branch data-scope routing
 *
 * A branch either keeps its product rows in the shared `products` table or
 * in a schema of its own. The choice is derived from the branch row alone;
 * [`ScopeResolver`] caches it per branch id.
 */

use crate::{
    db::DbPool,
    entities::branch::{self, Entity as Branch},
    errors::ServiceError,
    metrics::SCOPE_LOOKUPS,
    migrator::{products_table, Products},
};
use dashmap::DashMap;
use lazy_static::lazy_static;
use regex::Regex;
use sea_orm::{
    sea_query::{Alias, IntoTableRef, TableRef},
    ConnectionTrait, DbBackend, EntityTrait, Statement,
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, instrument};
use uuid::Uuid;

lazy_static! {
    static ref SCHEMA_NAME: Regex =
        Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").expect("schema name pattern compiles");
}

/// Schema names that would shadow a database's own namespaces
const RESERVED_SCHEMAS: &[&str] = &["main", "temp", "public", "information_schema", "pg_catalog"];

/// A validated SQL identifier naming an isolated branch schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SchemaName(String);

impl SchemaName {
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        if !SCHEMA_NAME.is_match(raw) {
            return Err(ServiceError::ValidationError(format!(
                "Invalid schema name '{}': expected lowercase letters, digits or '_' (max 63, not starting with a digit)",
                raw
            )));
        }
        if RESERVED_SCHEMAS.contains(&raw) || raw.starts_with("pg_") || raw.starts_with("sqlite_") {
            return Err(ServiceError::ValidationError(format!(
                "Schema name '{}' is reserved",
                raw
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SchemaName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        SchemaName::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Where a branch's product rows live
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "schema", rename_all = "lowercase")]
pub enum DataScope {
    Shared,
    Isolated(SchemaName),
}

impl DataScope {
    /// Scope of a branch row: `isolated_schema` set means isolated
    pub fn for_branch(branch: &branch::Model) -> Result<Self, ServiceError> {
        match branch.isolated_schema.as_deref() {
            Some(schema) => Ok(DataScope::Isolated(SchemaName::parse(schema)?)),
            None => Ok(DataScope::Shared),
        }
    }

    /// Table reference for `table` inside this scope
    pub fn table_ref(&self, table: &str) -> TableRef {
        match self {
            DataScope::Shared => Alias::new(table).into_table_ref(),
            DataScope::Isolated(schema) => {
                (Alias::new(schema.as_str()), Alias::new(table)).into_table_ref()
            }
        }
    }

    pub fn is_isolated(&self) -> bool {
        matches!(self, DataScope::Isolated(_))
    }
}

impl fmt::Display for DataScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataScope::Shared => f.write_str("shared"),
            DataScope::Isolated(schema) => write!(f, "isolated:{}", schema),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedBranch {
    scope: DataScope,
    is_active: bool,
}

/// Resolved routing target for one branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedScope {
    pub branch_id: Uuid,
    pub scope: DataScope,
    pub is_active: bool,
}

/// Caches branch id → data scope. Entries are filled on first lookup and
/// stay until [`ScopeResolver::invalidate`] or [`ScopeResolver::invalidate_all`].
pub struct ScopeResolver {
    db_pool: Arc<DbPool>,
    cache: DashMap<Uuid, CachedBranch>,
    sqlite_scope_dir: Option<PathBuf>,
}

impl ScopeResolver {
    pub fn new(db_pool: Arc<DbPool>, sqlite_scope_dir: Option<PathBuf>) -> Self {
        Self {
            db_pool,
            cache: DashMap::new(),
            sqlite_scope_dir,
        }
    }

    /// Looks up the branch's scope, provisioning an isolated scope on the
    /// first miss. Unknown branches are `NotFound`.
    #[instrument(skip(self))]
    pub async fn resolve(&self, branch_id: Uuid) -> Result<ResolvedScope, ServiceError> {
        if let Some(entry) = self.cache.get(&branch_id) {
            SCOPE_LOOKUPS.with_label_values(&["hit"]).inc();
            return Ok(ResolvedScope {
                branch_id,
                scope: entry.scope.clone(),
                is_active: entry.is_active,
            });
        }

        SCOPE_LOOKUPS.with_label_values(&["miss"]).inc();
        let branch = Branch::find_by_id(branch_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Branch {} not found", branch_id)))?;

        let scope = DataScope::for_branch(&branch)?;
        provision_scope(self.db_pool.as_ref(), &scope, self.sqlite_scope_dir.as_ref()).await?;

        debug!(%branch_id, %scope, "Caching branch data scope");
        self.cache.insert(
            branch_id,
            CachedBranch {
                scope: scope.clone(),
                is_active: branch.is_active,
            },
        );

        Ok(ResolvedScope {
            branch_id,
            scope,
            is_active: branch.is_active,
        })
    }

    /// Drops the cached entry for one branch; returns whether one existed
    pub fn invalidate(&self, branch_id: Uuid) -> bool {
        self.cache.remove(&branch_id).is_some()
    }

    /// Drops every cached entry; returns how many there were
    pub fn invalidate_all(&self) -> usize {
        let removed = self.cache.len();
        self.cache.clear();
        removed
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub fn sqlite_scope_dir(&self) -> Option<&PathBuf> {
        self.sqlite_scope_dir.as_ref()
    }
}

/// Makes sure the products table exists inside `scope`. Idempotent.
///
/// Postgres gets `CREATE SCHEMA IF NOT EXISTS`. SQLite attaches a database
/// under the schema name, in memory when the main database is in memory and
/// otherwise as a file. SQLite attachments are per connection, so isolated
/// scopes on SQLite expect a single-connection pool.
pub async fn provision_scope<C>(
    conn: &C,
    scope: &DataScope,
    sqlite_dir: Option<&PathBuf>,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let schema = match scope {
        DataScope::Shared => return Ok(()),
        DataScope::Isolated(schema) => schema,
    };
    let backend = conn.get_database_backend();

    match backend {
        DbBackend::Postgres => {
            conn.execute(Statement::from_string(
                backend,
                format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", schema),
            ))
            .await
            .map_err(ServiceError::db_error)?;
        }
        DbBackend::Sqlite => {
            let databases = sqlite_databases(conn).await?;
            if !databases.iter().any(|db| db.name == schema.as_str()) {
                let main_file = databases
                    .iter()
                    .find(|db| db.name == "main")
                    .map(|db| db.file.as_str())
                    .unwrap_or_default();
                let location = sqlite_scope_location(schema, main_file, sqlite_dir).await?;
                info!(%schema, %location, "Attaching SQLite database for isolated scope");
                conn.execute(Statement::from_string(
                    backend,
                    format!(
                        "ATTACH DATABASE '{}' AS \"{}\"",
                        location.replace('\'', "''"),
                        schema
                    ),
                ))
                .await
                .map_err(ServiceError::db_error)?;
            }
        }
        DbBackend::MySql => {
            return Err(ServiceError::InvalidOperation(
                "Isolated branch scopes are not supported on MySQL".to_string(),
            ))
        }
    }

    let create = products_table((Alias::new(schema.as_str()), Products::Table));
    conn.execute(backend.build(&create))
        .await
        .map_err(ServiceError::db_error)?;

    Ok(())
}

struct AttachedDatabase {
    name: String,
    /// Empty for in-memory and temporary databases
    file: String,
}

async fn sqlite_databases<C>(conn: &C) -> Result<Vec<AttachedDatabase>, ServiceError>
where
    C: ConnectionTrait,
{
    let rows = conn
        .query_all(Statement::from_string(
            DbBackend::Sqlite,
            "PRAGMA database_list".to_string(),
        ))
        .await
        .map_err(ServiceError::db_error)?;

    rows.iter()
        .map(|row| {
            Ok(AttachedDatabase {
                name: row.try_get("", "name").map_err(ServiceError::db_error)?,
                file: row
                    .try_get::<Option<String>>("", "file")
                    .map_err(ServiceError::db_error)?
                    .unwrap_or_default(),
            })
        })
        .collect()
}

/// An in-memory main database gets in-memory scopes. A file-backed one gets
/// `<schema>.db` in `sqlite_dir`, or next to the main file when unset.
async fn sqlite_scope_location(
    schema: &SchemaName,
    main_file: &str,
    sqlite_dir: Option<&PathBuf>,
) -> Result<String, ServiceError> {
    if main_file.is_empty() {
        return Ok(":memory:".to_string());
    }

    let dir = match sqlite_dir {
        Some(dir) => dir.clone(),
        None => Path::new(main_file)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };
    tokio::fs::create_dir_all(&dir).await.map_err(|e| {
        ServiceError::InternalError(format!(
            "Cannot create scope directory {}: {}",
            dir.display(),
            e
        ))
    })?;
    Ok(dir
        .join(format!("{}.db", schema))
        .to_string_lossy()
        .into_owned())
}
