//! Stored-table validation and table initialisation.

use super::descriptor::{ColumnDetails, SchemaDescriptor};
use super::object_schema::{ObjectSchema, SchemaSet, table_name_for};
use crate::core::{DbError, FieldType, MigrationError, MigrationErrorKind, Result};
use crate::storage::{ColumnKey, ColumnSpec, RowStore};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{Level, event};

/// Checks the stored table of `expected` and resolves its column handles.
///
/// Fails with a [`MigrationError`] naming the first mismatch found, in this
/// order: missing table, surplus columns, then per declared field: missing
/// column, type, link target, nullability, primary key, index.
pub fn validate_table(
    store: &dyn RowStore,
    expected: &ObjectSchema,
    schema: &SchemaSet,
    generation: u64,
) -> Result<SchemaDescriptor> {
    let class = expected.class_name.as_str();
    let table = expected.table_name();
    let fail = |kind: MigrationErrorKind, message: String| DbError::from(MigrationError::new(kind, class, message));

    if !store.has_table(&table) {
        return Err(fail(
            MigrationErrorKind::MissingTable,
            format!("The '{}' class is missing from the schema for this Realm.", class),
        ));
    }

    if store.is_embedded(&table)? != expected.embedded {
        return Err(fail(
            MigrationErrorKind::TypeMismatch,
            format!(
                "Class '{}' is stored as {} but declared as {}.",
                class,
                describe_embedded(!expected.embedded),
                describe_embedded(expected.embedded)
            ),
        ));
    }

    let expected_count = expected.properties.len();
    let actual_count = store.column_count(&table)?;
    if actual_count > expected_count {
        return Err(fail(
            MigrationErrorKind::ColumnCountMismatch {
                expected: expected_count,
                actual: actual_count,
            },
            format!(
                "Field count is more than expected - expected {} but was {}",
                expected_count, actual_count
            ),
        ));
    }

    let stored: HashMap<String, (ColumnKey, ColumnSpec)> = store
        .column_specs(&table)?
        .into_iter()
        .map(|(key, spec)| (spec.name.clone(), (key, spec)))
        .collect();
    let stored_pk = store.primary_key(&table)?;
    let mut columns = Vec::with_capacity(expected_count);

    for property in &expected.properties {
        let name = property.name.as_str();
        let field_fail = |kind: MigrationErrorKind, message: String| {
            DbError::from(MigrationError::new(kind, class, message).with_field(name))
        };

        let Some((key, spec)) = stored.get(name) else {
            return Err(field_fail(
                MigrationErrorKind::MissingField,
                format!(
                    "Missing field '{}' in existing Realm file. Either remove field or migrate using SchemaEditor::add_property().",
                    name
                ),
            ));
        };

        if spec.field_type != property.field_type {
            return Err(field_fail(
                MigrationErrorKind::TypeMismatch,
                format!(
                    "Invalid type '{}' for field '{}' in existing Realm file.",
                    spec.field_type, name
                ),
            ));
        }

        let mut target_embedded = false;
        if let Some(target_class) = &property.link_target {
            let target_table = table_name_for(target_class);
            if !store.has_table(&target_table) {
                return Err(field_fail(
                    MigrationErrorKind::MissingLinkTarget,
                    format!("Missing class '{}' for field '{}'", target_table, name),
                ));
            }
            let kind_name = match property.field_type {
                FieldType::List => "RealmList type",
                _ => "RealmObject",
            };
            let stored_target = spec.link_target.as_deref().unwrap_or("");
            if stored_target != target_table {
                return Err(field_fail(
                    MigrationErrorKind::LinkTargetMismatch,
                    format!(
                        "Invalid {} for field '{}': '{}' expected - was '{}'",
                        kind_name, name, target_table, stored_target
                    ),
                ));
            }
            if let Some(target_schema) = schema.get(target_class)
                && !matches_declared(store, &target_table, target_schema)?
            {
                return Err(field_fail(
                    MigrationErrorKind::LinkTargetMismatch,
                    format!(
                        "Invalid {} for field '{}': the stored '{}' table does not match the declared '{}' class",
                        kind_name, name, target_table, target_class
                    ),
                ));
            }
            target_embedded = store.is_embedded(&target_table)?;
        }

        if !property.field_type.is_link() && spec.nullable != property.nullable {
            let message = if property.nullable {
                format!(
                    "Field '{}' is required in the existing Realm file. Either declare it required or migrate using SchemaEditor::set_required(\"{}\", false).",
                    name, name
                )
            } else {
                format!(
                    "Field '{}' does support null values in the existing Realm file. Either declare it nullable or migrate using SchemaEditor::set_required(\"{}\", true).",
                    name, name
                )
            };
            return Err(field_fail(
                MigrationErrorKind::NullabilityMismatch {
                    expected_nullable: property.nullable,
                },
                message,
            ));
        }

        let is_stored_pk = stored_pk == Some(*key);
        if property.primary_key && !is_stored_pk {
            return Err(field_fail(
                MigrationErrorKind::PrimaryKeyMismatch,
                format!(
                    "Primary key not defined for field '{}' in existing Realm file. Migrate using SchemaEditor::set_primary_key().",
                    name
                ),
            ));
        }
        if !property.primary_key && is_stored_pk {
            return Err(field_fail(
                MigrationErrorKind::PrimaryKeyMismatch,
                format!("Primary Key defined for field '{}' was removed.", name),
            ));
        }

        if property.indexed != spec.indexed {
            let message = if property.indexed {
                format!(
                    "Index not defined for field '{}' in existing Realm file. Either remove the index declaration or migrate using SchemaEditor::add_index().",
                    name
                )
            } else {
                format!(
                    "Index defined for field '{}' in existing Realm file. Either declare the index or migrate using SchemaEditor::remove_index().",
                    name
                )
            };
            return Err(field_fail(MigrationErrorKind::IndexMismatch, message));
        }

        columns.push(ColumnDetails {
            name: property.name.clone(),
            key: *key,
            field_type: property.field_type,
            nullable: property.nullable,
            primary_key: property.primary_key,
            link_target: property.link_target.clone(),
            target_embedded,
        });
    }

    event!(Level::TRACE, class, columns = columns.len(), generation, "validated table");
    Ok(SchemaDescriptor::new(Arc::new(expected.clone()), columns, generation))
}

fn describe_embedded(embedded: bool) -> &'static str {
    if embedded { "embedded" } else { "top-level" }
}

/// Structural comparison of a stored table with a declared class: column
/// names, types, nullability, link targets and primary key.
fn matches_declared(store: &dyn RowStore, table: &str, declared: &ObjectSchema) -> Result<bool> {
    if store.column_count(table)? != declared.properties.len() || store.is_embedded(table)? != declared.embedded {
        return Ok(false);
    }
    let stored_pk = store.primary_key(table)?;
    for property in &declared.properties {
        let Some(key) = store.resolve_column(table, &property.name) else {
            return Ok(false);
        };
        let spec = store.column_spec(table, key)?;
        let same = spec.field_type == property.field_type
            && (property.field_type.is_link() || spec.nullable == property.nullable)
            && spec.link_target == property.link_target.as_deref().map(table_name_for)
            && (stored_pk == Some(key)) == property.primary_key;
        if !same {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Creates the columns, primary key and indexes of a class in an existing,
/// empty table.
pub fn init_table(store: &mut dyn RowStore, schema: &ObjectSchema) -> Result<()> {
    let table = schema.table_name();
    if !store.has_table(&table) {
        store.create_table(&table, schema.embedded)?;
    }

    let mut primary_key = None;
    for property in &schema.properties {
        let spec = ColumnSpec {
            name: property.name.clone(),
            field_type: property.field_type,
            nullable: property.nullable,
            link_target: property.link_target.as_deref().map(table_name_for),
            indexed: property.indexed,
        };
        let key = store.add_column(&table, spec)?;
        if property.primary_key {
            primary_key = Some(key);
        }
    }
    store.set_primary_key(&table, primary_key)?;

    event!(
        Level::DEBUG,
        class = %schema.class_name,
        columns = schema.properties.len(),
        "initialised table"
    );
    Ok(())
}

/// Creates tables for every class of `schema` that has none yet.
/// All tables are created before any column so that links can resolve.
pub fn init_missing_tables(store: &mut dyn RowStore, schema: &SchemaSet) -> Result<Vec<String>> {
    let missing: Vec<&ObjectSchema> = schema
        .classes()
        .iter()
        .filter(|c| !store.has_table(&c.table_name()))
        .collect();

    for class in &missing {
        store.create_table(&class.table_name(), class.embedded)?;
    }
    for class in &missing {
        init_table(store, class)?;
    }
    Ok(missing.into_iter().map(|c| c.class_name.clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::schema::Property;
    use crate::storage::InMemoryStore;

    fn person() -> ObjectSchema {
        ObjectSchema::new("Person")
            .property(Property::new("name", DataType::Text).required())
            .property(Property::new("age", DataType::Integer).required())
    }

    #[test]
    fn test_init_table_then_validate() {
        let set = SchemaSet::new(vec![person()]).unwrap();
        let mut store = InMemoryStore::new();
        init_missing_tables(&mut store, &set).unwrap();

        assert_eq!(store.column_count("class_Person").unwrap(), 2);
        assert_eq!(store.primary_key("class_Person").unwrap(), None);

        let descriptor = validate_table(&store, &set.classes()[0], &set, 1).unwrap();
        assert_eq!(descriptor.columns().len(), 2);
        assert_eq!(
            descriptor.column_key("age").unwrap(),
            store.resolve_column("class_Person", "age").unwrap()
        );
    }

    #[test]
    fn test_surplus_column_reports_count() {
        let set = SchemaSet::new(vec![person()]).unwrap();
        let mut store = InMemoryStore::new();
        init_missing_tables(&mut store, &set).unwrap();
        store
            .add_column("class_Person", ColumnSpec::new("extra", FieldType::Scalar(DataType::Text), true))
            .unwrap();

        let err = validate_table(&store, &set.classes()[0], &set, 1).unwrap_err();
        match err {
            DbError::Migration(e) => {
                assert_eq!(e.kind, MigrationErrorKind::ColumnCountMismatch { expected: 2, actual: 3 });
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
