use super::migration::SchemaEditor;
use crate::core::Result;
use crate::schema::SchemaSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Callback run when the stored schema version is older than the configured one.
/// Receives the editor, the stored version and the target version.
pub type MigrationFn = Arc<dyn Fn(&mut SchemaEditor<'_>, u64, u64) -> Result<()> + Send + Sync>;

/// Realm configuration
#[derive(Clone)]
pub struct RealmConfig {
    /// Realm name, used in logs
    pub name: String,

    /// Snapshot file; `None` keeps the Realm in memory only
    pub path: Option<PathBuf>,

    /// Declared model classes
    pub schema: SchemaSet,

    /// Version of `schema`
    pub schema_version: u64,

    pub migration: Option<MigrationFn>,

    /// Wipe stored data instead of failing when the stored schema does not match
    pub delete_if_migration_needed: bool,

    /// Depth used by detached copies when none is given
    pub max_detach_depth: usize,
}

impl RealmConfig {
    /// Create a new in-memory configuration
    pub fn new(schema: SchemaSet) -> Self {
        Self {
            name: "default.realm".to_string(),
            path: None,
            schema,
            schema_version: 0,
            migration: None,
            delete_if_migration_needed: false,
            max_detach_depth: usize::MAX,
        }
    }

    /// Set the Realm name
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Persist to a snapshot file
    pub fn path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the schema version
    pub fn schema_version(mut self, version: u64) -> Self {
        self.schema_version = version;
        self
    }

    /// Set the migration callback
    pub fn migration<F>(mut self, migration: F) -> Self
    where
        F: Fn(&mut SchemaEditor<'_>, u64, u64) -> Result<()> + Send + Sync + 'static,
    {
        self.migration = Some(Arc::new(migration));
        self
    }

    pub fn delete_if_migration_needed(mut self) -> Self {
        self.delete_if_migration_needed = true;
        self
    }

    pub fn max_detach_depth(mut self, depth: usize) -> Self {
        self.max_detach_depth = depth;
        self
    }
}

impl fmt::Debug for RealmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealmConfig")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("classes", &self.schema.classes().len())
            .field("schema_version", &self.schema_version)
            .field("migration", &self.migration.is_some())
            .field("delete_if_migration_needed", &self.delete_if_migration_needed)
            .field("max_detach_depth", &self.max_detach_depth)
            .finish()
    }
}
