// crates/cassette-store/src/cassette.rs
// ============================================================================
// Module: Cassette Store
// Description: SQLite-backed asset, codebase, route and dataset store.
// Purpose: Own all cassette state behind a privilege gate.
// Dependencies: rusqlite, serde_json
// ============================================================================

//! ## Overview
//! A [`Cassette`] is one control file (`k7.db`) plus an optional dataset file
//! (`dataset.db`) attached as the `dataset` schema. Every operation consults
//! the [`PrivilegeGate`] before touching the connection:
//! - writes require a writable open,
//! - [`Cassette::query`] requires a read-only (queryable) open,
//! - [`Cassette::unsafe_query`] requires extended privileges.
//!
//! Catalog mutations bump a change stamp so pollers can skip no-op rebuilds.
//! Security posture: SQL text reaches the engine only through `query` paths;
//! every identifier spliced into DDL passes the identifier grammar first.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use rusqlite::params_from_iter;

use crate::bounded::BoundedWriter;
use crate::bounded::clamp_query_budget;
use crate::deadline::Deadline;
use crate::error::StoreError;
use crate::path::is_script_mime_type;
use crate::path::is_text_mime_type;
use crate::path::normalize_asset_path;
use crate::path::normalize_methods;
use crate::path::path_hash;
use crate::path::validate_codebase_path;
use crate::path::validate_route_template;
use crate::table::TableDef;
use crate::table::load_table_def;
use crate::table::validate_table_name;
use crate::value::Row;
use crate::value::SqlValue;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Control file name inside a cassette directory.
pub const CONTROL_FILE_NAME: &str = "k7.db";
/// Dataset file name inside a cassette directory.
pub const DATASET_FILE_NAME: &str = "dataset.db";
/// Schema name the dataset file is attached under.
pub const DATASET_SCHEMA: &str = "dataset";
/// Counter bumped by every catalog mutation.
const CATALOG_COUNTER: &str = "catalog";
/// Counter allocating asset identifiers.
const ASSET_COUNTER: &str = "asset";
/// Separator used to store route methods.
const METHOD_SEPARATOR: char = '|';
/// Busy timeout applied to every connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
/// Engine instructions between deadline checks inside one statement step.
const PROGRESS_INTERVAL: i32 = 1000;

/// Internal catalog schema.
const CONTROL_SCHEMA_SQL: &str = "
    create table if not exists bb_counters (
        name text primary key,
        val integer not null
    );
    create table if not exists bb_assets (
        asset_id integer primary key,
        path text not null,
        path_hash64 integer not null,
        mime_type text not null,
        content blob not null
    );
    create unique index if not exists uidx_bb_assets_path on bb_assets (path);
    create index if not exists idx_bb_assets_path_hash on bb_assets (path_hash64);
    create table if not exists bb_codebase (
        asset_id integer primary key
    );
    create table if not exists bb_routes (
        route text primary key,
        methods text not null,
        asset_id integer not null
    );";

// ============================================================================
// SECTION: Types
// ============================================================================

/// How a cassette is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-write-create; content authoring and administration.
    Writable,
    /// Read-only; public serving and queries.
    ReadOnly,
}

/// Independent writable and extended-privilege axes of a cassette.
///
/// # Invariants
/// - `writable` is fixed at open time.
/// - `extended` can only become true while `writable` is true.
#[derive(Debug)]
pub struct PrivilegeGate {
    /// Whether the store accepts writes.
    writable: bool,
    /// Whether privileged queries are permitted.
    extended: AtomicBool,
}

impl PrivilegeGate {
    /// Creates a gate for the given open mode with privileges off.
    #[must_use]
    pub const fn new(mode: OpenMode) -> Self {
        Self {
            writable: matches!(mode, OpenMode::Writable),
            extended: AtomicBool::new(false),
        }
    }

    /// Returns true when the store accepts writes.
    #[must_use]
    pub const fn writable(&self) -> bool {
        self.writable
    }

    /// Returns true when the store may serve bounded queries.
    #[must_use]
    pub const fn queryable(&self) -> bool {
        !self.writable
    }

    /// Returns true when extended privileges are enabled.
    #[must_use]
    pub fn has_privileges(&self) -> bool {
        self.extended.load(Ordering::Acquire)
    }

    /// Turns extended privileges on.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReadonlyStore`] for read-only stores.
    pub fn enable_privileges(&self) -> Result<(), StoreError> {
        if !self.writable {
            return Err(StoreError::ReadonlyStore);
        }
        self.extended.store(true, Ordering::Release);
        Ok(())
    }

    /// Fails unless the store is writable.
    fn require_writable(&self) -> Result<(), StoreError> {
        if self.writable { Ok(()) } else { Err(StoreError::ReadonlyStore) }
    }

    /// Fails unless the store is queryable.
    fn require_queryable(&self) -> Result<(), StoreError> {
        if self.queryable() { Ok(()) } else { Err(StoreError::NotQueryable) }
    }

    /// Fails unless extended privileges are enabled.
    fn require_privileges(&self) -> Result<(), StoreError> {
        if self.has_privileges() { Ok(()) } else { Err(StoreError::MissingExtendedPrivileges) }
    }
}

/// Result of copying an asset into a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedAsset {
    /// Asset identifier.
    pub asset_id: i64,
    /// Stored mime type.
    pub mime_type: String,
    /// Bytes written to the sink.
    pub bytes_written: usize,
}

/// Active route bound to an enabled codebase asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    /// Route template.
    pub route: String,
    /// Upper-cased HTTP verbs in mapping order.
    pub methods: Vec<String>,
    /// Script source of the target asset.
    pub source: String,
    /// Normalized path of the target asset.
    pub asset_path: String,
}

/// Content-addressed store handle.
///
/// # Invariants
/// - Closed exactly once via [`Cassette::close`] or drop.
/// - Every public operation checks the [`PrivilegeGate`] first.
#[derive(Debug)]
pub struct Cassette {
    /// Serialized connection to the control file.
    connection: Mutex<Connection>,
    /// Open mode and privilege flag.
    gate: PrivilegeGate,
    /// Whether the dataset file is attached.
    dataset: bool,
    /// Cassette directory.
    location: PathBuf,
}

// ============================================================================
// SECTION: Lifecycle
// ============================================================================

impl Cassette {
    /// Opens the cassette stored in `dir`.
    ///
    /// Writable opens create the directory and schema; read-only opens verify
    /// the schema already exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] or [`StoreError::Db`] when the files cannot
    /// be opened, and [`StoreError::Corrupt`] when a read-only cassette lacks
    /// the control schema.
    pub fn open(dir: &Path, mode: OpenMode, dataset: bool) -> Result<Self, StoreError> {
        let control_path = dir.join(CONTROL_FILE_NAME);
        let mut connection = match mode {
            OpenMode::Writable => {
                std::fs::create_dir_all(dir)?;
                let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX;
                Connection::open_with_flags(&control_path, flags)?
            }
            OpenMode::ReadOnly => {
                let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
                Connection::open_with_flags(&control_path, flags)?
            }
        };
        connection.busy_timeout(BUSY_TIMEOUT)?;
        if dataset {
            let dataset_path = dir.join(DATASET_FILE_NAME);
            connection.execute(
                "attach database ?1 as dataset",
                params![dataset_path.to_string_lossy().as_ref()],
            )?;
        }
        match mode {
            OpenMode::Writable => {
                connection.execute_batch("pragma main.journal_mode = wal;")?;
                if dataset {
                    connection.execute_batch("pragma dataset.journal_mode = wal;")?;
                }
                initialize_schema(&mut connection)?;
            }
            OpenMode::ReadOnly => verify_schema(&connection)?,
        }
        Ok(Self {
            connection: Mutex::new(connection),
            gate: PrivilegeGate::new(mode),
            dataset,
            location: dir.to_path_buf(),
        })
    }

    /// Closes the connection, releasing the control and dataset files.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] when the engine refuses to close.
    pub fn close(self) -> Result<(), StoreError> {
        let connection = self
            .connection
            .into_inner()
            .map_err(|_| StoreError::Db("cassette connection mutex poisoned".to_string()))?;
        connection.close().map_err(|(_, err)| StoreError::from(err))
    }

    /// Cassette directory.
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Privilege gate for this cassette.
    #[must_use]
    pub const fn gate(&self) -> &PrivilegeGate {
        &self.gate
    }

    /// Returns true when the store may serve bounded queries.
    #[must_use]
    pub const fn queryable(&self) -> bool {
        self.gate.queryable()
    }

    /// Returns true when extended privileges are enabled.
    #[must_use]
    pub fn has_privileges(&self) -> bool {
        self.gate.has_privileges()
    }

    /// Turns extended privileges on.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReadonlyStore`] for read-only cassettes.
    pub fn enable_privileges(&self) -> Result<(), StoreError> {
        self.gate.enable_privileges()
    }

    /// Schema user tables are created in.
    pub(crate) const fn user_schema(&self) -> &'static str {
        if self.dataset { DATASET_SCHEMA } else { "main" }
    }

    /// Returns true when the dataset file is attached.
    pub(crate) const fn dataset_attached(&self) -> bool {
        self.dataset
    }

    /// Locks the connection.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.connection
            .lock()
            .map_err(|_| StoreError::Db("cassette connection mutex poisoned".to_string()))
    }

    /// Fails unless the store is writable.
    pub(crate) fn require_writable(&self) -> Result<(), StoreError> {
        self.gate.require_writable()
    }
}

// ============================================================================
// SECTION: Assets
// ============================================================================

impl Cassette {
    /// Lists every asset path in lexicographic order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] when the listing fails.
    pub fn list_assets(&self) -> Result<Vec<String>, StoreError> {
        let guard = self.lock()?;
        let mut statement = guard.prepare("select path from bb_assets order by path")?;
        let paths = statement.query_map([], |row| row.get::<_, String>(0))?;
        Ok(paths.collect::<Result<_, _>>()?)
    }

    /// Writes the asset content at `path` into `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AssetNotFound`] when no asset matches the
    /// normalized path exactly.
    pub fn copy_asset<W: Write>(
        &self,
        path: &str,
        sink: &mut W,
    ) -> Result<CopiedAsset, StoreError> {
        let normalized = normalize_asset_path(path)?;
        let guard = self.lock()?;
        let found = guard
            .query_row(
                "select asset_id, mime_type, content from bb_assets \
                 where path_hash64 = ?1 and path = ?2",
                params![path_hash(&normalized), normalized],
                |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, Vec<u8>>(2)?))
                },
            )
            .optional()?;
        drop(guard);
        let Some((asset_id, mime_type, content)) = found else {
            return Err(StoreError::AssetNotFound {
                path: normalized,
            });
        };
        sink.write_all(&content)?;
        Ok(CopiedAsset {
            asset_id,
            mime_type,
            bytes_written: content.len(),
        })
    }

    /// Inserts or replaces the asset at `path`, returning its identifier.
    ///
    /// Content and mime type are replaced together in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReadonlyStore`] on read-only cassettes,
    /// [`StoreError::InvalidTextContent`] for non UTF-8 text, and
    /// [`StoreError::InvalidCodebase`] when an enabled codebase asset would
    /// lose its script mime type.
    pub fn store_asset(
        &self,
        path: &str,
        mime_type: &str,
        content: &[u8],
    ) -> Result<i64, StoreError> {
        self.require_writable()?;
        let normalized = normalize_asset_path(path)?;
        if is_text_mime_type(mime_type) && std::str::from_utf8(content).is_err() {
            return Err(StoreError::InvalidTextContent {
                path: normalized,
                mime_type: mime_type.to_string(),
            });
        }
        let hash = path_hash(&normalized);
        let mut guard = self.lock()?;
        let tx = guard.transaction()?;
        let existing = find_asset(&tx, &normalized)?;
        let asset_id = match existing {
            Some(asset) => {
                if asset.codebase && !is_script_mime_type(mime_type) {
                    return Err(StoreError::InvalidCodebase {
                        path: normalized,
                        mime_type: mime_type.to_string(),
                        reason: "enabled codebase assets must keep a script mime type".to_string(),
                    });
                }
                asset.asset_id
            }
            None => next_seq(&tx, ASSET_COUNTER)?,
        };
        tx.execute(
            "insert into bb_assets (asset_id, path, path_hash64, mime_type, content) \
             values (?1, ?2, ?3, ?4, ?5) \
             on conflict (path) do update set path_hash64 = excluded.path_hash64, \
             mime_type = excluded.mime_type, content = excluded.content",
            params![asset_id, normalized, hash, mime_type, content],
        )?;
        next_seq(&tx, CATALOG_COUNTER)?;
        tx.commit()?;
        Ok(asset_id)
    }
}

// ============================================================================
// SECTION: Codebase and Routes
// ============================================================================

impl Cassette {
    /// Marks or unmarks the asset at `path` as executable.
    ///
    /// Enabling an enabled asset and disabling a disabled one are no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AssetNotFound`] for unknown paths and
    /// [`StoreError::InvalidCodebase`] in either direction when the asset has
    /// the wrong mime type, prefix or extension.
    pub fn toggle_codebase(&self, path: &str, enable: bool) -> Result<(), StoreError> {
        self.require_writable()?;
        let normalized = normalize_asset_path(path)?;
        let mut guard = self.lock()?;
        let tx = guard.transaction()?;
        let Some(asset) = find_asset(&tx, &normalized)? else {
            return Err(StoreError::AssetNotFound {
                path: normalized,
            });
        };
        if !is_script_mime_type(&asset.mime_type) {
            return Err(StoreError::InvalidCodebase {
                path: normalized,
                mime_type: asset.mime_type,
                reason: "mime type is not an executable script type".to_string(),
            });
        }
        validate_codebase_path(&normalized, &asset.mime_type)?;
        let changed = if enable {
            tx.execute(
                "insert into bb_codebase (asset_id) values (?1) on conflict (asset_id) do nothing",
                params![asset.asset_id],
            )?
        } else {
            tx.execute("delete from bb_codebase where asset_id = ?1", params![asset.asset_id])?
        };
        if changed > 0 {
            next_seq(&tx, CATALOG_COUNTER)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Binds `route` to the codebase asset at `asset_path`.
    ///
    /// Re-mapping an existing route replaces its methods and target.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidRoute`] or [`StoreError::InvalidMethod`]
    /// for malformed input and [`StoreError::CodebaseNotFound`] when the target
    /// is not an enabled codebase asset.
    pub fn map_route<S: AsRef<str>>(
        &self,
        methods: &[S],
        route: &str,
        asset_path: &str,
    ) -> Result<(), StoreError> {
        self.require_writable()?;
        validate_route_template(route)?;
        let methods = normalize_methods(route, methods)?;
        let normalized = normalize_asset_path(asset_path)?;
        let mut guard = self.lock()?;
        let tx = guard.transaction()?;
        let target = find_asset(&tx, &normalized)?.filter(|asset| asset.codebase);
        let Some(target) = target else {
            return Err(StoreError::CodebaseNotFound {
                path: normalized,
            });
        };
        let joined = methods.join(&METHOD_SEPARATOR.to_string());
        tx.execute(
            "insert into bb_routes (route, methods, asset_id) values (?1, ?2, ?3) \
             on conflict (route) do update set methods = excluded.methods, \
             asset_id = excluded.asset_id",
            params![route, joined, target.asset_id],
        )?;
        next_seq(&tx, CATALOG_COUNTER)?;
        tx.commit()?;
        Ok(())
    }

    /// Lists routes whose target is an enabled codebase asset, by route.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] when stored source is not UTF-8.
    pub fn list_routes(&self) -> Result<Vec<RouteEntry>, StoreError> {
        let guard = self.lock()?;
        let mut statement = guard.prepare(
            "select r.route, r.methods, a.path, a.content from bb_routes r \
             join bb_codebase c on c.asset_id = r.asset_id \
             join bb_assets a on a.asset_id = r.asset_id order by r.route",
        )?;
        let mut rows = statement.query([])?;
        let mut routes = Vec::new();
        while let Some(row) = rows.next()? {
            routes.push(route_entry(
                row.get(0)?,
                &row.get::<_, String>(1)?,
                row.get(2)?,
                row.get(3)?,
            )?);
        }
        Ok(routes)
    }

    /// Looks up one active route by template.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RouteNotFound`] when no active route matches.
    pub fn lookup_route(&self, route: &str) -> Result<RouteEntry, StoreError> {
        let guard = self.lock()?;
        let found = guard
            .query_row(
                "select r.route, r.methods, a.path, a.content from bb_routes r \
                 join bb_codebase c on c.asset_id = r.asset_id \
                 join bb_assets a on a.asset_id = r.asset_id where r.route = ?1",
                params![route],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((route, methods, asset_path, content)) = found else {
            return Err(StoreError::RouteNotFound {
                route: route.to_string(),
            });
        };
        route_entry(route, &methods, asset_path, content)
    }

    /// Returns the catalog change stamp.
    ///
    /// The stamp increases with every asset write, codebase toggle and route
    /// mapping; equal stamps mean an unchanged catalog.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] when the counter cannot be read.
    pub fn change_stamp(&self) -> Result<i64, StoreError> {
        let guard = self.lock()?;
        let stamp = guard
            .query_row(
                "select val from bb_counters where name = ?1",
                params![CATALOG_COUNTER],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(stamp.unwrap_or(0))
    }
}

// ============================================================================
// SECTION: Tables
// ============================================================================

impl Cassette {
    /// Creates a dataset table and returns the DDL that was executed.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad names or types and
    /// [`StoreError::TableAlreadyExists`] when the table exists.
    pub fn create_table(&self, table: &TableDef) -> Result<String, StoreError> {
        self.require_writable()?;
        let schema = self.user_schema();
        let ddl = table.render_ddl(schema)?;
        let mut guard = self.lock()?;
        let tx = guard.transaction()?;
        if resolve_table_schema(&tx, self.dataset, &table.name)?.is_some() {
            return Err(StoreError::TableAlreadyExists {
                name: table.name.clone(),
            });
        }
        tx.execute_batch(&ddl)?;
        tx.commit()?;
        Ok(ddl)
    }

    /// Reconstructs the definition of an existing dataset table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TableNotFound`] when the table does not exist.
    pub fn table_def(&self, name: &str) -> Result<TableDef, StoreError> {
        validate_table_name(name)?;
        let guard = self.lock()?;
        let schema = resolve_table_schema(&guard, self.dataset, name)?;
        let table = match schema {
            Some(schema) => load_table_def(&guard, schema, name)?,
            None => None,
        };
        table.ok_or_else(|| StoreError::TableNotFound {
            name: name.to_string(),
        })
    }

    /// Renders the DDL of an existing dataset table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TableNotFound`] when the table does not exist.
    pub fn table_ddl(&self, name: &str) -> Result<String, StoreError> {
        let table = self.table_def(name)?;
        let guard = self.lock()?;
        let schema = resolve_table_schema(&guard, self.dataset, name)?.unwrap_or("main");
        table.render_ddl(schema)
    }
}

// ============================================================================
// SECTION: Queries
// ============================================================================

impl Cassette {
    /// Streams the result of `sql` into `sink` as one JSON object.
    ///
    /// Output has the shape `{"columns":[...],"rows":[[...],...]}` and is
    /// written one row at a time through a [`BoundedWriter`] whose budget is
    /// `max_bytes` clamped to the query ceiling. Returns the bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotQueryable`] on writable cassettes,
    /// [`StoreError::WriteOverflow`] when output exceeds the budget,
    /// [`StoreError::DeadlineExceeded`] when `deadline` passes, even inside a
    /// single engine step, and
    /// [`StoreError::Query`] when the engine rejects the statement.
    pub fn query<W: Write>(
        &self,
        sink: &mut W,
        max_bytes: i64,
        sql: &str,
        args: &[SqlValue],
        deadline: &Deadline,
    ) -> Result<usize, StoreError> {
        self.gate.require_queryable()?;
        deadline.check()?;
        let mut writer = BoundedWriter::new(sink, clamp_query_budget(max_bytes));
        let guard = self.lock()?;
        let _interrupt = InterruptOnDeadline::install(&guard, deadline)?;
        let fail = |err| step_error(sql, err, deadline);
        let mut statement = guard.prepare(sql).map_err(fail)?;
        let columns: Vec<String> =
            statement.column_names().into_iter().map(str::to_string).collect();
        writer.push(b"{\"columns\":")?;
        writer.push(&encode_json(&columns)?)?;
        writer.push(b",\"rows\":[")?;
        let mut rows = statement.query(params_from_iter(args.iter())).map_err(fail)?;
        let mut first = true;
        loop {
            deadline.check()?;
            let Some(row) = rows.next().map_err(fail)? else {
                break;
            };
            let mut encoded = Vec::with_capacity(columns.len());
            for index in 0 .. columns.len() {
                let value = row.get_ref(index).map_err(fail)?;
                encoded.push(SqlValue::from_value_ref(value).to_json());
            }
            if !first {
                writer.push(b",")?;
            }
            first = false;
            writer.push(&encode_json(&encoded)?)?;
        }
        writer.push(b"]}")?;
        let total = writer.total_bytes();
        writer.finish()?;
        Ok(total)
    }

    /// Runs `sql` with extended privileges, bypassing the read-only rule.
    ///
    /// Returns the produced rows when `has_output` is set, otherwise executes
    /// the statement and returns no rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingExtendedPrivileges`] before looking at the
    /// SQL when privileges are off, [`StoreError::DeadlineExceeded`] when
    /// `deadline` passes and [`StoreError::Query`] when the engine rejects the
    /// statement.
    pub fn unsafe_query(
        &self,
        sql: &str,
        has_output: bool,
        args: &[SqlValue],
        deadline: &Deadline,
    ) -> Result<Vec<Row>, StoreError> {
        self.gate.require_privileges()?;
        deadline.check()?;
        let guard = self.lock()?;
        let _interrupt = InterruptOnDeadline::install(&guard, deadline)?;
        let fail = |err| step_error(sql, err, deadline);
        let mut statement = guard.prepare(sql).map_err(fail)?;
        if !has_output {
            statement.execute(params_from_iter(args.iter())).map_err(fail)?;
            return Ok(Vec::new());
        }
        let width = statement.column_count();
        let mut rows = statement.query(params_from_iter(args.iter())).map_err(fail)?;
        let mut output = Vec::new();
        loop {
            deadline.check()?;
            let Some(row) = rows.next().map_err(fail)? else {
                break;
            };
            let mut values = Vec::with_capacity(width);
            for index in 0 .. width {
                let value = row.get_ref(index).map_err(fail)?;
                values.push(SqlValue::from_value_ref(value));
            }
            output.push(values);
        }
        Ok(output)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Asset row as seen by catalog mutations.
struct AssetRecord {
    /// Asset identifier.
    asset_id: i64,
    /// Stored mime type.
    mime_type: String,
    /// Whether the asset is an enabled codebase entry.
    codebase: bool,
}

/// Creates the internal catalog tables.
fn initialize_schema(connection: &mut Connection) -> Result<(), StoreError> {
    let tx = connection.transaction()?;
    tx.execute_batch(CONTROL_SCHEMA_SQL)?;
    tx.commit()?;
    Ok(())
}

/// Verifies a read-only cassette carries the catalog tables.
fn verify_schema(connection: &Connection) -> Result<(), StoreError> {
    let tables: i64 = connection.query_row(
        "select count(*) from main.sqlite_master where type = 'table' \
         and name in ('bb_counters', 'bb_assets', 'bb_codebase', 'bb_routes')",
        [],
        |row| row.get(0),
    )?;
    if tables != 4 {
        return Err(StoreError::Corrupt("control schema is missing".to_string()));
    }
    Ok(())
}

/// Allocates the next value of the named counter.
pub(crate) fn next_seq(tx: &Transaction<'_>, name: &str) -> Result<i64, StoreError> {
    let value = tx.query_row(
        "insert into bb_counters (name, val) values (?1, 1) \
         on conflict (name) do update set val = val + 1 returning val",
        params![name],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(value)
}

/// Finds an asset by normalized path.
fn find_asset(tx: &Transaction<'_>, normalized: &str) -> Result<Option<AssetRecord>, StoreError> {
    let record = tx
        .query_row(
            "select a.asset_id, a.mime_type, c.asset_id is not null from bb_assets a \
             left join bb_codebase c on c.asset_id = a.asset_id \
             where a.path_hash64 = ?1 and a.path = ?2",
            params![path_hash(normalized), normalized],
            |row| {
                Ok(AssetRecord {
                    asset_id: row.get(0)?,
                    mime_type: row.get(1)?,
                    codebase: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

/// Returns the schema holding `name`, preferring the dataset schema.
pub(crate) fn resolve_table_schema(
    connection: &Connection,
    dataset: bool,
    name: &str,
) -> Result<Option<&'static str>, StoreError> {
    let schemas: &[&'static str] = if dataset { &["dataset", "main"] } else { &["main"] };
    for schema in schemas {
        let found: i64 = connection.query_row(
            &format!(
                "select count(*) from {schema}.sqlite_master where type = 'table' \
                 and lower(name) = lower(?1)"
            ),
            params![name],
            |row| row.get(0),
        )?;
        if found > 0 {
            return Ok(Some(schema));
        }
    }
    Ok(None)
}

/// Builds a route entry from stored columns.
fn route_entry(
    route: String,
    methods: &str,
    asset_path: String,
    content: Vec<u8>,
) -> Result<RouteEntry, StoreError> {
    let source = String::from_utf8(content).map_err(|_| {
        StoreError::Corrupt(format!("codebase asset {asset_path} is not valid utf-8"))
    })?;
    Ok(RouteEntry {
        route,
        methods: methods
            .split(METHOD_SEPARATOR)
            .filter(|method| !method.is_empty())
            .map(str::to_string)
            .collect(),
        source,
        asset_path,
    })
}

/// Interrupts statements on a connection once a deadline passes.
///
/// The handler stays installed until the guard drops, so it must outlive
/// every statement prepared under it.
struct InterruptOnDeadline<'c> {
    /// Connection carrying the progress handler.
    connection: &'c Connection,
}

impl<'c> InterruptOnDeadline<'c> {
    /// Installs a progress handler that aborts the running step on expiry.
    fn install(connection: &'c Connection, deadline: &Deadline) -> Result<Self, StoreError> {
        let deadline = deadline.clone();
        connection.progress_handler(PROGRESS_INTERVAL, Some(move || deadline.is_expired()))?;
        Ok(Self {
            connection,
        })
    }
}

impl Drop for InterruptOnDeadline<'_> {
    fn drop(&mut self) {
        let _ = self.connection.progress_handler(0, None::<fn() -> bool>);
    }
}

/// Maps an engine error raised while stepping `sql` under `deadline`.
fn step_error(sql: &str, error: rusqlite::Error, deadline: &Deadline) -> StoreError {
    if error.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) && deadline.is_expired()
    {
        return StoreError::DeadlineExceeded;
    }
    query_error(sql, error)
}

/// Maps an engine error raised while running `sql`.
fn query_error(sql: &str, error: rusqlite::Error) -> StoreError {
    match StoreError::from(error) {
        StoreError::Db(message) => StoreError::Query {
            sql: sql.to_string(),
            message,
        },
        other => other,
    }
}

/// Serializes a value to compact JSON bytes.
fn encode_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|err| StoreError::Io(err.to_string()))
}
