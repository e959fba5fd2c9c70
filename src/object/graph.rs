use super::identity::ObjectRef;
use crate::core::{DbError, Result, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Arena index of a detached object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// Value of one field of a detached object.
///
/// `None` inside a variant is an explicit null. A field missing from the
/// object altogether is "not specified".
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    Link(Option<ObjectRef>),
    List(Option<Vec<ObjectRef>>),
    Values(Option<Vec<Value>>),
}

/// An unmanaged model object.
#[derive(Debug, Clone, PartialEq)]
pub struct DetachedObject {
    class_name: String,
    fields: BTreeMap<String, FieldValue>,
}

impl DetachedObject {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, FieldValue::Value(value.into()));
        self
    }

    pub fn with_link(mut self, field: impl Into<String>, target: Option<ObjectRef>) -> Self {
        self.set(field, FieldValue::Link(target));
        self
    }

    pub fn with_list(mut self, field: impl Into<String>, items: Vec<ObjectRef>) -> Self {
        self.set(field, FieldValue::List(Some(items)));
        self
    }

    pub fn with_values(mut self, field: impl Into<String>, items: Vec<Value>) -> Self {
        self.set(field, FieldValue::Values(Some(items)));
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: FieldValue) {
        self.fields.insert(field.into(), value);
    }

    pub fn unset(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.remove(field)
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut FieldValue> {
        self.fields.get_mut(field)
    }

    /// Scalar value of a field; `None` when the field is not specified.
    pub fn value(&self, field: &str) -> Option<&Value> {
        match self.fields.get(field) {
            Some(FieldValue::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn link(&self, field: &str) -> Option<&ObjectRef> {
        match self.fields.get(field) {
            Some(FieldValue::Link(Some(r))) => Some(r),
            _ => None,
        }
    }

    pub fn list(&self, field: &str) -> Option<&[ObjectRef]> {
        match self.fields.get(field) {
            Some(FieldValue::List(Some(items))) => Some(items),
            _ => None,
        }
    }

    pub fn values(&self, field: &str) -> Option<&[Value]> {
        match self.fields.get(field) {
            Some(FieldValue::Values(Some(items))) => Some(items),
            _ => None,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_specified(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }
}

/// Arena owning a graph of detached objects. Relationships point at arena ids,
/// so cycles and shared sub-objects need no reference counting.
#[derive(Debug, Clone, Default)]
pub struct ObjectGraph {
    objects: BTreeMap<ObjectId, DetachedObject>,
    next_id: u64,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, object: DetachedObject) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        self.objects.insert(id, object);
        id
    }

    pub fn get(&self, id: ObjectId) -> Result<&DetachedObject> {
        self.objects
            .get(&id)
            .ok_or_else(|| DbError::ExecutionError(format!("Detached object {} not found", id)))
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Result<&mut DetachedObject> {
        self.objects
            .get_mut(&id)
            .ok_or_else(|| DbError::ExecutionError(format!("Detached object {} not found", id)))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.objects.keys().copied()
    }
}
