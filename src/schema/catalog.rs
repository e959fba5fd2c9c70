use super::descriptor::SchemaDescriptor;
use super::object_schema::SchemaSet;
use crate::core::{DbError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Schema descriptors of one open Realm generation.
///
/// Immutable once built; every change produces a new catalog (copy-on-write)
/// so descriptors handed out earlier stay valid for their generation.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    schema: Arc<SchemaSet>,
    descriptors: Arc<HashMap<String, Arc<SchemaDescriptor>>>,
    generation: u64,
}

impl SchemaCatalog {
    pub fn new(schema: SchemaSet, generation: u64) -> Self {
        Self {
            schema: Arc::new(schema),
            descriptors: Arc::new(HashMap::new()),
            generation,
        }
    }

    pub fn schema(&self) -> &SchemaSet {
        &self.schema
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Adds or supersedes the descriptor of one class - returns a NEW catalog.
    pub fn with_descriptor(self, descriptor: SchemaDescriptor) -> Self {
        self.with_shared(Arc::new(descriptor))
    }

    pub fn with_shared(self, descriptor: Arc<SchemaDescriptor>) -> Self {
        let mut descriptors = (*self.descriptors).clone();
        descriptors.insert(descriptor.class_name().to_string(), descriptor);
        Self {
            schema: self.schema,
            descriptors: Arc::new(descriptors),
            generation: self.generation,
        }
    }

    pub fn get(&self, class_name: &str) -> Result<&Arc<SchemaDescriptor>> {
        self.descriptors
            .get(class_name)
            .ok_or_else(|| DbError::ClassNotFound(class_name.to_string()))
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.descriptors.contains_key(class_name)
    }

    pub fn class_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.descriptors.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
