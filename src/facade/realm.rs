use super::config::{MigrationFn, RealmConfig};
use super::migration::SchemaEditor;
use crate::accessor::{ConstructionPolicy, ManagedObject};
use crate::bulk;
use crate::copy::{self, CopyCache, CopyTarget, ImportFlags, SourceSet};
use crate::core::{DbError, Result, Value};
use crate::object::{ContextId, DatabaseId, ManagedRef, ObjectGraph, ObjectId, ObjectRef};
use crate::schema::{SchemaCatalog, SchemaDescriptor, SchemaSet, init_missing_tables, validate_table};
use crate::storage::{InMemoryStore, RowKey, RowStore, SnapshotManager, StoreSnapshot};
use crate::transaction::{Change, Transaction};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Level, event, info_span};

/// An open Realm: the native store, the schema descriptors of the current
/// generation and the write transaction, confined to the thread that opened it.
pub struct Realm {
    id: DatabaseId,
    context: ContextId,
    config: RealmConfig,
    store: InMemoryStore,
    catalog: SchemaCatalog,
    transaction: Option<Transaction>,
    snapshots: Option<SnapshotManager>,
    closed: bool,
}

impl Realm {
    /// Opens a Realm, loading its snapshot when a path is configured.
    ///
    /// Runs the migration callback when the stored schema version is older
    /// than the configured one, creates tables for new classes and validates
    /// every declared class against storage.
    pub fn open(config: RealmConfig) -> Result<Self> {
        let span = info_span!("realm_open", name = %config.name);
        let _enter = span.enter();

        let snapshots = config.path.as_ref().map(SnapshotManager::new);
        let store = match &snapshots {
            Some(manager) => manager
                .load()?
                .map(StoreSnapshot::into_store)
                .unwrap_or_else(InMemoryStore::new),
            None => InMemoryStore::new(),
        };

        let mut realm = Self {
            id: DatabaseId::new(),
            context: ContextId::current(),
            catalog: SchemaCatalog::new(config.schema.clone(), 0),
            config,
            store,
            transaction: None,
            snapshots,
            closed: false,
        };
        realm.initialize()?;

        event!(
            Level::INFO,
            classes = realm.catalog.len(),
            schema_version = realm.store.schema_version(),
            "Realm opened"
        );
        Ok(realm)
    }

    fn initialize(&mut self) -> Result<()> {
        let stored = self.store.schema_version();
        let target = self.config.schema_version;
        let has_data = !self.store.table_names().is_empty();

        if has_data && stored > target {
            return Err(DbError::InvalidSchema(format!(
                "Provided schema version {} is less than last set version {}.",
                target, stored
            )));
        }

        if has_data
            && stored < target
            && let Some(migration) = self.config.migration.clone()
        {
            self.begin_write()?;
            if let Err(e) = self.run_migration(&migration, stored, target) {
                self.cancel_write()?;
                return Err(e);
            }
            self.finish_write(false)?;
        }

        let schema = self.config.schema.clone();
        let created = init_missing_tables(&mut self.store, &schema)?;
        if !created.is_empty() {
            event!(Level::DEBUG, tables = ?created, "Created missing tables");
        }

        self.catalog = match self.build_catalog(&schema, 1, None) {
            Ok(catalog) => catalog,
            Err(DbError::Migration(e)) if self.config.delete_if_migration_needed => {
                event!(Level::WARN, error = %e, "Schema mismatch, deleting stored data");
                self.store = InMemoryStore::new();
                init_missing_tables(&mut self.store, &schema)?;
                self.build_catalog(&schema, 1, None)?
            }
            Err(e) => return Err(e),
        };

        self.store.set_schema_version(target);
        self.persist()
    }

    fn run_migration(&mut self, migration: &MigrationFn, from: u64, to: u64) -> Result<HashSet<String>> {
        let span = info_span!("migration", from, to);
        let _enter = span.enter();

        let mut editor = SchemaEditor::new(&mut self.store, &self.catalog);
        migration(&mut editor, from, to)?;
        let touched = editor.into_touched();
        event!(Level::INFO, touched = touched.len(), "Migration callback finished");
        Ok(touched)
    }

    /// Validates every class of `schema`. Descriptors of classes that were not
    /// touched and whose declaration did not change are carried over.
    fn build_catalog(
        &self,
        schema: &SchemaSet,
        generation: u64,
        previous: Option<(&SchemaCatalog, &HashSet<String>)>,
    ) -> Result<SchemaCatalog> {
        let mut catalog = SchemaCatalog::new(schema.clone(), generation);
        for class in schema.classes() {
            let carried = previous.and_then(|(old, touched)| {
                let unchanged =
                    !touched.contains(&class.class_name) && old.schema().get(&class.class_name) == Some(class);
                if unchanged {
                    old.get(&class.class_name).ok().cloned()
                } else {
                    None
                }
            });
            catalog = match carried {
                Some(descriptor) => catalog.with_shared(descriptor),
                None => catalog.with_descriptor(validate_table(&self.store, class, schema, generation)?),
            };
        }
        event!(Level::DEBUG, classes = catalog.len(), generation, "Schema validated");
        Ok(catalog)
    }

    fn persist(&self) -> Result<()> {
        if let Some(manager) = &self.snapshots {
            manager.save(&StoreSnapshot::capture(&self.store))?;
        }
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.transaction.is_some() {
            self.cancel_write()?;
        }
        self.closed = true;
        event!(Level::INFO, name = %self.config.name, "Realm closed");
        Ok(())
    }

    // ========================================================================
    // Identity and state
    // ========================================================================

    pub fn id(&self) -> DatabaseId {
        self.id
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn config(&self) -> &RealmConfig {
        &self.config
    }

    pub fn schema(&self) -> &SchemaSet {
        self.catalog.schema()
    }

    pub fn schema_version(&self) -> u64 {
        self.store.schema_version()
    }

    pub fn schema_generation(&self) -> u64 {
        self.catalog.generation()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(DbError::StaleObject(
                "This Realm instance has already been closed, making it unusable.".to_string(),
            ));
        }
        if ContextId::current() != self.context {
            return Err(DbError::CrossContext);
        }
        Ok(())
    }

    pub fn ensure_in_write(&self) -> Result<()> {
        self.ensure_open()?;
        match &self.transaction {
            Some(transaction) => transaction.ensure_active(),
            None => Err(DbError::Transaction(
                "Cannot modify managed objects outside of a write transaction.".to_string(),
            )),
        }
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut InMemoryStore {
        &mut self.store
    }

    pub fn descriptor(&self, class_name: &str) -> Result<Arc<SchemaDescriptor>> {
        self.catalog.get(class_name).cloned()
    }

    pub fn managed_ref(&self, class_name: &str, row: RowKey) -> ManagedRef {
        ManagedRef {
            database: self.id,
            context: self.context,
            class_name: class_name.to_string(),
            row,
        }
    }

    /// Live accessor for a row; validity is checked on first use.
    pub fn object(&self, class_name: &str, row: RowKey) -> Result<ManagedObject> {
        let descriptor = self.descriptor(class_name)?;
        Ok(ManagedObject::live(self.managed_ref(class_name, row), descriptor))
    }

    // ========================================================================
    // Write transactions
    // ========================================================================

    pub fn begin_write(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.transaction.is_some() {
            return Err(DbError::Transaction(
                "The Realm is already in a write transaction".to_string(),
            ));
        }
        self.store.begin_recording();
        let transaction = Transaction::begin();
        event!(Level::DEBUG, txn = %transaction.id(), "Write transaction started");
        self.transaction = Some(transaction);
        Ok(())
    }

    pub fn commit_write(&mut self) -> Result<()> {
        self.finish_write(true)
    }

    fn finish_write(&mut self, persist: bool) -> Result<()> {
        self.ensure_in_write()?;
        let mut transaction = self
            .transaction
            .take()
            .ok_or_else(|| DbError::Transaction("No write transaction in progress".to_string()))?;
        transaction.commit()?;
        let changes = self.store.take_changes();
        event!(
            Level::DEBUG,
            txn = %transaction.id(),
            changes = changes.len(),
            elapsed_us = transaction.duration().as_micros() as u64,
            "Write transaction committed"
        );
        if persist {
            self.persist()?;
        }
        Ok(())
    }

    /// Discards everything written since `begin_write`.
    pub fn cancel_write(&mut self) -> Result<()> {
        let mut transaction = self
            .transaction
            .take()
            .ok_or_else(|| DbError::Transaction("No write transaction in progress".to_string()))?;
        transaction.rollback()?;
        let reverted = self.store.rollback()?;
        event!(Level::DEBUG, txn = %transaction.id(), reverted, "Write transaction cancelled");
        Ok(())
    }

    /// Runs `f` in a write transaction, committing on success and cancelling on error.
    pub fn write<T>(&mut self, f: impl FnOnce(&mut Realm) -> Result<T>) -> Result<T> {
        self.begin_write()?;
        match f(self) {
            Ok(value) => {
                self.commit_write()?;
                Ok(value)
            }
            Err(e) => {
                self.cancel_write()?;
                Err(e)
            }
        }
    }

    /// Native changes made so far by the running write transaction.
    pub fn pending_changes(&self) -> &[Change] {
        self.store.pending_changes()
    }

    // ========================================================================
    // Objects
    // ========================================================================

    pub(crate) fn allocate_row(&mut self, descriptor: &SchemaDescriptor, key: Option<Value>) -> Result<RowKey> {
        let table = descriptor.table_name();
        match descriptor.primary_key() {
            Some(pk) => {
                let key = key.unwrap_or_else(|| pk.default_value());
                self.store.create_row_with_key(&table, pk.key, key)
            }
            None => self.store.create_row(&table),
        }
    }

    pub fn create_object(&mut self, class_name: &str) -> Result<ManagedObject> {
        self.create_object_with(class_name, None, ConstructionPolicy::accepting_defaults(), |_, _| Ok(()))
    }

    pub fn create_object_with_primary_key(&mut self, class_name: &str, key: impl Into<Value>) -> Result<ManagedObject> {
        self.create_object_with(
            class_name,
            Some(key.into()),
            ConstructionPolicy::accepting_defaults(),
            |_, _| Ok(()),
        )
    }

    /// Creates an object, applies declared default values under `policy`,
    /// runs `init` while the object is still under construction, then makes it live.
    pub fn create_object_with<F>(
        &mut self,
        class_name: &str,
        key: Option<Value>,
        policy: ConstructionPolicy,
        init: F,
    ) -> Result<ManagedObject>
    where
        F: FnOnce(&mut Realm, &ManagedObject) -> Result<()>,
    {
        self.ensure_in_write()?;
        let descriptor = self.descriptor(class_name)?;
        if descriptor.is_embedded() {
            return Err(DbError::ExecutionError(format!(
                "Embedded class '{}' cannot be created without a parent; use create_embedded_object",
                class_name
            )));
        }
        match (descriptor.primary_key(), &key) {
            (Some(_), None) => {
                return Err(DbError::ExecutionError(format!(
                    "'{}' has a primary key, use 'create_object_with_primary_key' instead.",
                    class_name
                )));
            }
            (None, Some(_)) => {
                return Err(DbError::ExecutionError(format!(
                    "'{}' does not have a primary key",
                    class_name
                )));
            }
            _ => {}
        }

        let row = self.allocate_row(&descriptor, key)?;
        let mut object = ManagedObject::under_construction(self.managed_ref(class_name, row), descriptor.clone(), policy);
        for property in &descriptor.schema().properties {
            if let Some(default) = &property.default_value {
                object.set(self, &property.name, default.clone())?;
            }
        }
        init(self, &object)?;
        object.finish_construction();
        Ok(object)
    }

    /// Creates a new embedded object owned by `parent` through `field`.
    /// A single-valued field drops its previous child; a list field appends.
    pub fn create_embedded_object(&mut self, parent: &ManagedObject, field: &str) -> Result<ManagedObject> {
        self.ensure_in_write()?;
        parent.ensure_valid(self)?;
        let descriptor = self.descriptor(parent.class_name())?;
        let column = descriptor.require(field)?;
        let target = match &column.link_target {
            Some(target) if column.is_embedded_link() => target.clone(),
            _ => {
                return Err(DbError::TypeMismatch(format!(
                    "Field '{}' does not reference an embedded class",
                    field
                )));
            }
        };
        let row = self
            .store
            .create_embedded_child(&descriptor.table_name(), parent.row(), column.key)?;
        self.object(&target, row)
    }

    pub fn find_by_primary_key(&self, class_name: &str, key: impl Into<Value>) -> Result<Option<ManagedObject>> {
        self.ensure_open()?;
        let descriptor = self.descriptor(class_name)?;
        let pk = descriptor
            .primary_key()
            .ok_or_else(|| DbError::ExecutionError(format!("Class '{}' has no primary key", class_name)))?;
        match self.store.find_first(&descriptor.table_name(), pk.key, &key.into())? {
            Some(row) => self.object(class_name, row).map(Some),
            None => Ok(None),
        }
    }

    pub fn all_objects(&self, class_name: &str) -> Result<Vec<ManagedObject>> {
        self.ensure_open()?;
        let descriptor = self.descriptor(class_name)?;
        self.store
            .rows(&descriptor.table_name())?
            .into_iter()
            .map(|row| self.object(class_name, row))
            .collect()
    }

    pub fn count(&self, class_name: &str) -> Result<usize> {
        self.ensure_open()?;
        let descriptor = self.descriptor(class_name)?;
        self.store.row_count(&descriptor.table_name())
    }

    /// Deletes an object with its embedded children; links to it are cleared
    /// and list entries pointing at it are removed.
    pub fn delete_object(&mut self, mut object: ManagedObject) -> Result<()> {
        self.ensure_in_write()?;
        object.ensure_valid(self)?;
        let descriptor = self.descriptor(object.class_name())?;
        self.store.delete_row(&descriptor.table_name(), object.row())?;
        object.invalidate();
        Ok(())
    }

    // ========================================================================
    // Copy and bulk insert
    // ========================================================================

    pub fn copy_to_realm(&mut self, graph: &ObjectGraph, root: ObjectId) -> Result<ManagedObject> {
        self.copy_to_realm_with(SourceSet::graph(graph), &root.into(), false, ImportFlags::default())
    }

    /// Copies `root`, updating objects whose primary key already exists.
    pub fn copy_to_realm_or_update(&mut self, graph: &ObjectGraph, root: ObjectId) -> Result<ManagedObject> {
        let class_name = graph.get(root)?.class_name().to_string();
        if self.descriptor(&class_name)?.primary_key().is_none() {
            return Err(DbError::ExecutionError(format!(
                "A RealmObject with no @PrimaryKey cannot be updated: '{}'",
                class_name
            )));
        }
        self.copy_to_realm_with(SourceSet::graph(graph), &root.into(), true, ImportFlags::default())
    }

    pub fn copy_to_realm_with(
        &mut self,
        sources: SourceSet<'_>,
        root: &ObjectRef,
        update: bool,
        flags: ImportFlags,
    ) -> Result<ManagedObject> {
        copy::copy_or_update(self, sources, root, update, flags, &mut CopyCache::new())
    }

    /// Copies several roots with one shared identity cache.
    pub fn copy_all_to_realm(
        &mut self,
        sources: SourceSet<'_>,
        roots: &[ObjectRef],
        update: bool,
    ) -> Result<Vec<ManagedObject>> {
        let mut cache = CopyCache::new();
        roots
            .iter()
            .map(|root| copy::copy_or_update(self, sources, root, update, ImportFlags::default(), &mut cache))
            .collect()
    }

    /// Detached copy of `object`, following relationships up to the
    /// configured `max_detach_depth`.
    pub fn copy_from_realm(&self, object: &ManagedObject) -> Result<(ObjectGraph, ObjectId)> {
        self.copy_from_realm_to_depth(object, self.config.max_detach_depth)
    }

    pub fn copy_from_realm_to_depth(&self, object: &ManagedObject, max_depth: usize) -> Result<(ObjectGraph, ObjectId)> {
        copy::create_detached_copy(self, object, max_depth)
    }

    pub fn insert(&mut self, graph: &ObjectGraph, roots: &[ObjectId]) -> Result<Vec<CopyTarget>> {
        let roots: Vec<ObjectRef> = roots.iter().copied().map(ObjectRef::from).collect();
        bulk::insert(self, SourceSet::graph(graph), &roots, &mut CopyCache::new())
    }

    pub fn insert_or_update(&mut self, graph: &ObjectGraph, roots: &[ObjectId]) -> Result<Vec<CopyTarget>> {
        let roots: Vec<ObjectRef> = roots.iter().copied().map(ObjectRef::from).collect();
        bulk::insert_or_update(self, SourceSet::graph(graph), &roots, &mut CopyCache::new())
    }

    // ========================================================================
    // Migration of an open Realm
    // ========================================================================

    /// Moves an open Realm to `schema` at `version`, running `migration` in a
    /// write transaction. Nothing changes if the result does not validate.
    pub fn migrate<F>(&mut self, schema: SchemaSet, version: u64, migration: F) -> Result<()>
    where
        F: Fn(&mut SchemaEditor<'_>, u64, u64) -> Result<()> + Send + Sync + 'static,
    {
        let migration: MigrationFn = Arc::new(migration);
        let from = self.store.schema_version();
        self.begin_write()?;

        match self.migrated_catalog(&migration, &schema, from, version) {
            Ok(catalog) => {
                self.catalog = catalog;
                self.config.schema = schema;
                self.config.schema_version = version;
                self.store.set_schema_version(version);
                self.commit_write()
            }
            Err(e) => {
                self.cancel_write()?;
                Err(e)
            }
        }
    }

    fn migrated_catalog(
        &mut self,
        migration: &MigrationFn,
        schema: &SchemaSet,
        from: u64,
        to: u64,
    ) -> Result<SchemaCatalog> {
        let touched = self.run_migration(migration, from, to)?;
        init_missing_tables(&mut self.store, schema)?;
        self.build_catalog(schema, self.catalog.generation() + 1, Some((&self.catalog, &touched)))
    }
}

impl std::fmt::Debug for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realm")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("generation", &self.catalog.generation())
            .field("in_transaction", &self.transaction.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}
