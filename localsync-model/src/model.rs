//! Untyped and typed model instances.

use crate::error::{ModelError, ModelResult};
use crate::schema::ModelSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Joins composite key values into a single identifier.
pub const COMPOSITE_KEY_SEPARATOR: &str = "#";

/// An application type stored through the engine.
pub trait Model: Serialize + DeserializeOwned + Send + Sync {
    /// Name of the schema registered for this type.
    fn model_name() -> &'static str;
}

/// A model instance as a JSON object tagged with its model name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnyModel {
    pub model_name: String,
    pub instance: Map<String, Value>,
}

impl AnyModel {
    /// Wraps a JSON value, which must be an object.
    pub fn new(model_name: impl Into<String>, instance: Value) -> ModelResult<Self> {
        let model_name = model_name.into();
        match instance {
            Value::Object(instance) => Ok(Self {
                model_name,
                instance,
            }),
            other => Err(ModelError::InvalidModel(format!(
                "{model_name} payload must be an object, got {other}"
            ))),
        }
    }

    /// Parses a serialized payload.
    pub fn from_json(model_name: impl Into<String>, json: &str) -> ModelResult<Self> {
        Self::new(model_name, serde_json::from_str(json)?)
    }

    /// Converts a typed model.
    pub fn from_model<M: Model>(model: &M) -> ModelResult<Self> {
        Self::new(M::model_name(), serde_json::to_value(model)?)
    }

    /// Converts back into a typed model.
    pub fn into_model<M: Model>(self) -> ModelResult<M> {
        if self.model_name != M::model_name() {
            return Err(ModelError::InvalidModel(format!(
                "expected {}, got {}",
                M::model_name(),
                self.model_name
            )));
        }
        Ok(serde_json::from_value(Value::Object(self.instance))?)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.instance.get(field)
    }

    /// The instance identifier: the key value, or key values joined with `#`.
    pub fn identifier(&self, schema: &ModelSchema) -> ModelResult<String> {
        let parts = schema
            .primary_key
            .iter()
            .map(|key| match self.instance.get(key) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(Value::Number(n)) => Ok(n.to_string()),
                Some(Value::Bool(b)) => Ok(b.to_string()),
                _ => Err(ModelError::InvalidModel(format!(
                    "{} is missing key field {key}",
                    schema.name
                ))),
            })
            .collect::<ModelResult<Vec<String>>>()?;
        Ok(parts.join(COMPOSITE_KEY_SEPARATOR))
    }

    /// Checks that required fields are present and values match field types.
    /// Unknown keys are tolerated; associations loaded by joins live there.
    pub fn validate(&self, schema: &ModelSchema) -> ModelResult<()> {
        if self.model_name != schema.name {
            return Err(ModelError::InvalidModel(format!(
                "expected {}, got {}",
                schema.name, self.model_name
            )));
        }
        for field in &schema.fields {
            let value = self.instance.get(&field.name).unwrap_or(&Value::Null);
            if field.required && value.is_null() {
                return Err(ModelError::InvalidModel(format!(
                    "{}.{} is required",
                    schema.name, field.name
                )));
            }
            if !field.field_type.accepts(value) {
                return Err(ModelError::InvalidModel(format!(
                    "{}.{} has wrong type: {value}",
                    schema.name, field.name
                )));
            }
        }
        Ok(())
    }

    /// Serializes the instance object.
    pub fn to_json_string(&self) -> ModelResult<String> {
        Ok(serde_json::to_string(&self.instance)?)
    }
}
