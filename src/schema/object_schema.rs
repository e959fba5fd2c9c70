use crate::core::{DataType, DbError, FieldType, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Prefix of the native table backing a class.
pub const TABLE_PREFIX: &str = "class_";

pub fn table_name_for(class_name: &str) -> String {
    format!("{}{}", TABLE_PREFIX, class_name)
}

pub fn class_name_for(table_name: &str) -> &str {
    table_name.strip_prefix(TABLE_PREFIX).unwrap_or(table_name)
}

fn default_nullable() -> bool {
    true
}

/// One persisted field of a model class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub indexed: bool,
    /// Class name of the referenced type for object and list fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
    /// Written while a new object is under construction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl Property {
    /// A nullable scalar field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Scalar(data_type),
            nullable: true,
            primary_key: false,
            indexed: false,
            link_target: None,
            default_value: None,
        }
    }

    pub fn object(name: impl Into<String>, target_class: impl Into<String>) -> Self {
        Self {
            field_type: FieldType::Object,
            link_target: Some(target_class.into()),
            ..Self::new(name, DataType::Integer)
        }
    }

    pub fn list(name: impl Into<String>, target_class: impl Into<String>) -> Self {
        Self {
            field_type: FieldType::List,
            nullable: false,
            link_target: Some(target_class.into()),
            ..Self::new(name, DataType::Integer)
        }
    }

    /// A list of primitives; elements are nullable unless `required` is applied.
    pub fn scalar_list(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            field_type: FieldType::ScalarList(data_type),
            ..Self::new(name, data_type)
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Marks the primary key; implies a search index.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.indexed = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Nullability of link columns is fixed by their kind.
    fn normalize(&mut self) {
        match self.field_type {
            FieldType::Object => self.nullable = true,
            FieldType::List => self.nullable = false,
            _ => {}
        }
        if self.primary_key {
            self.indexed = true;
        }
    }
}

/// Expected shape of one model class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSchema {
    pub class_name: String,
    #[serde(default)]
    pub embedded: bool,
    pub properties: Vec<Property>,
}

impl ObjectSchema {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            embedded: false,
            properties: Vec::new(),
        }
    }

    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn table_name(&self) -> String {
        table_name_for(&self.class_name)
    }

    pub fn get_property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn primary_key(&self) -> Option<&Property> {
        self.properties.iter().find(|p| p.primary_key)
    }

    /// Checks the class definition on its own, before any table is consulted.
    pub fn validate_definition(&self) -> Result<()> {
        if self.class_name.is_empty() {
            return Err(DbError::InvalidSchema("class name cannot be empty".to_string()));
        }

        let mut names = HashSet::new();
        for property in &self.properties {
            if !names.insert(property.name.as_str()) {
                return Err(DbError::InvalidSchema(format!(
                    "Property '{}' is declared twice in class '{}'",
                    property.name, self.class_name
                )));
            }
            if let Some(default) = &property.default_value {
                let accepted = match property.field_type {
                    FieldType::Scalar(data_type) => default.is_null() || data_type.coerce(default.clone()).is_some(),
                    _ => false,
                };
                if !accepted {
                    return Err(DbError::InvalidSchema(format!(
                        "Default value {} does not fit property '{}.{}'",
                        default, self.class_name, property.name
                    )));
                }
            }
            if property.field_type.is_link() && property.link_target.is_none() {
                return Err(DbError::InvalidSchema(format!(
                    "Property '{}.{}' needs a link target class",
                    self.class_name, property.name
                )));
            }
        }

        let keys: Vec<&Property> = self.properties.iter().filter(|p| p.primary_key).collect();
        match keys.as_slice() {
            [] => Ok(()),
            [_] if self.embedded => Err(DbError::InvalidSchema(format!(
                "Embedded class '{}' cannot have a primary key",
                self.class_name
            ))),
            [key] => match key.field_type {
                FieldType::Scalar(DataType::Integer | DataType::Text) => Ok(()),
                other => Err(DbError::InvalidSchema(format!(
                    "Field '{}' of type {} cannot be a primary key",
                    key.name, other
                ))),
            },
            _ => Err(DbError::InvalidSchema(format!(
                "Class '{}' declares more than one primary key",
                self.class_name
            ))),
        }
    }
}

/// The full set of classes a Realm is opened with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSet {
    classes: Vec<ObjectSchema>,
}

impl SchemaSet {
    pub fn new(classes: Vec<ObjectSchema>) -> Result<Self> {
        let mut set = Self { classes };
        set.normalize();
        set.validate()?;
        Ok(set)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let set: SchemaSet =
            serde_json::from_str(json).map_err(|e| DbError::InvalidSchema(format!("cannot parse schema: {}", e)))?;
        Self::new(set.classes)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| DbError::InvalidSchema(e.to_string()))
    }

    pub fn classes(&self) -> &[ObjectSchema] {
        &self.classes
    }

    pub fn get(&self, class_name: &str) -> Option<&ObjectSchema> {
        self.classes.iter().find(|c| c.class_name == class_name)
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.get(class_name).is_some()
    }

    fn normalize(&mut self) {
        for class in &mut self.classes {
            for property in &mut class.properties {
                property.normalize();
            }
        }
    }

    fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for class in &self.classes {
            if !names.insert(class.class_name.as_str()) {
                return Err(DbError::InvalidSchema(format!(
                    "Class '{}' is declared twice",
                    class.class_name
                )));
            }
            class.validate_definition()?;
        }
        for class in &self.classes {
            for property in &class.properties {
                if let Some(target) = &property.link_target
                    && !self.contains(target)
                {
                    return Err(DbError::InvalidSchema(format!(
                        "Property '{}.{}' links to unknown class '{}'",
                        class.class_name, property.name, target
                    )));
                }
            }
        }
        Ok(())
    }
}
