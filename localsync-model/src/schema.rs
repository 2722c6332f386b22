use serde::{Deserialize, Serialize};

/// Column that stores the `#`-joined identifier of composite-key models.
/// Foreign keys that reference a composite-key parent point at this column.
pub const COMPOSITE_KEY_COLUMN: &str = "@@primaryKey";

/// Describes one model type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub name: String,
    pub fields: Vec<ModelField>,
    /// Primary key field names in key order. `["id"]` for simple keys.
    pub primary_key: Vec<String>,
    /// Whether local writes are replicated to the remote backend.
    pub sync_enabled: bool,
}

impl ModelSchema {
    /// Creates a sync-enabled schema keyed by `id`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            primary_key: vec!["id".to_string()],
            sync_enabled: true,
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, field: ModelField) -> Self {
        self.fields.push(field);
        self
    }

    /// Replaces the primary key with the given (possibly composite) key.
    #[must_use]
    pub fn primary_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the model as local only.
    #[must_use]
    pub fn local_only(mut self) -> Self {
        self.sync_enabled = false;
        self
    }

    /// Looks up a field by name.
    pub fn get_field(&self, name: &str) -> Option<&ModelField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_composite_key(&self) -> bool {
        self.primary_key.len() > 1
    }

    /// The column holding the row identity.
    pub fn primary_key_column(&self) -> &str {
        if self.has_composite_key() {
            COMPOSITE_KEY_COLUMN
        } else {
            self.primary_key.first().map_or("id", String::as_str)
        }
    }

    /// Fields with a `belongs-to` association, in declaration order.
    pub fn foreign_keys(&self) -> impl Iterator<Item = &ModelField> {
        self.fields.iter().filter(|f| f.association.is_some())
    }

    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_key.iter().any(|k| k == name)
    }

    /// Fields in storage column order: key fields in key order, plain fields
    /// alphabetically, then foreign key fields alphabetically.
    pub fn sorted_fields(&self) -> Vec<&ModelField> {
        let mut keys: Vec<&ModelField> = self
            .primary_key
            .iter()
            .filter_map(|k| self.get_field(k))
            .collect();
        let mut plain: Vec<&ModelField> = self
            .fields
            .iter()
            .filter(|f| !self.is_primary_key(&f.name) && f.association.is_none())
            .collect();
        let mut foreign: Vec<&ModelField> = self
            .foreign_keys()
            .filter(|f| !self.is_primary_key(&f.name))
            .collect();
        plain.sort_by(|a, b| a.name.cmp(&b.name));
        foreign.sort_by(|a, b| a.name.cmp(&b.name));
        keys.extend(plain);
        keys.extend(foreign);
        keys
    }

    /// Storage column names in order, including the composite key column.
    pub fn columns(&self) -> Vec<&str> {
        let mut columns = Vec::with_capacity(self.fields.len() + 1);
        if self.has_composite_key() {
            columns.push(COMPOSITE_KEY_COLUMN);
        }
        columns.extend(self.sorted_fields().into_iter().map(|f| f.name.as_str()));
        columns
    }
}

/// A single stored field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelField {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub association: Option<Association>,
}

impl ModelField {
    fn simple(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            association: None,
        }
    }

    /// Shorthand for a required string field.
    pub fn string(name: &str) -> Self {
        Self::simple(name, FieldType::String)
    }

    /// Shorthand for a required integer field.
    pub fn int(name: &str) -> Self {
        Self::simple(name, FieldType::Int)
    }

    /// Shorthand for a required floating point field.
    pub fn double(name: &str) -> Self {
        Self::simple(name, FieldType::Double)
    }

    /// Shorthand for a required boolean field.
    pub fn bool(name: &str) -> Self {
        Self::simple(name, FieldType::Bool)
    }

    /// Shorthand for a required ISO-8601 date time field.
    pub fn datetime(name: &str) -> Self {
        Self::simple(name, FieldType::DateTime)
    }

    /// Shorthand for a required enum field stored by name.
    pub fn enumeration(name: &str) -> Self {
        Self::simple(name, FieldType::Enum)
    }

    /// Shorthand for an embedded JSON value.
    pub fn json(name: &str) -> Self {
        Self::simple(name, FieldType::Json)
    }

    /// Shorthand for a foreign key column pointing at `target`.
    ///
    /// `association` is the name the joined parent is exposed under when
    /// querying (e.g. column `postId`, association `post`).
    pub fn belongs_to(name: &str, association: &str, target: &str) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::String,
            required: true,
            association: Some(Association {
                name: association.into(),
                target: target.into(),
                unique: false,
            }),
        }
    }

    /// Makes the field nullable.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Makes a foreign key one-to-one.
    #[must_use]
    pub fn unique(mut self) -> Self {
        if let Some(association) = self.association.as_mut() {
            association.unique = true;
        }
        self
    }
}

/// A `belongs-to` link from a child column to a parent model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub name: String,
    pub target: String,
    /// One-to-one relation; the column gets a unique constraint.
    #[serde(default)]
    pub unique: bool,
}

/// The data type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Int,
    Double,
    Bool,
    DateTime,
    Enum,
    Json,
}

impl FieldType {
    /// SQLite column affinity.
    pub const fn sql_type(&self) -> &'static str {
        match self {
            Self::Int | Self::Bool => "integer",
            Self::Double => "real",
            Self::String | Self::DateTime | Self::Enum | Self::Json => "text",
        }
    }

    /// Whether a JSON value is acceptable for this field type.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match (self, value) {
            (_, Value::Null) => true,
            (Self::String | Self::DateTime | Self::Enum, Value::String(_)) => true,
            (Self::Int, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (Self::Double, Value::Number(_)) => true,
            (Self::Bool, Value::Bool(_)) => true,
            (Self::Json, _) => true,
            _ => false,
        }
    }
}
