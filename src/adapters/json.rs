use crate::adapters::table::{read_existing, write_file};
use crate::domain::model::{Resource, Schema, Value};
use crate::domain::ports::Validator;
use crate::utils::error::{MeillionenError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonKind {
    Object,
    Array,
}

/// Payload of a `json` schema.
///
/// Recognised options: `kind` (`object` or `array`) and `required_fields`,
/// which every object (or every array element) must carry. An empty payload
/// accepts any JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<JsonKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_fields: Vec<String>,
}

impl JsonSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: JsonKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn require(mut self, field: impl Into<String>) -> Self {
        self.required_fields.push(field.into());
        self
    }

    pub fn into_schema(self, name: impl Into<String>) -> Schema {
        let payload = serde_json::to_vec(&self).unwrap_or_default();
        Schema::new(name, JsonValidator::TYPE_NAME, payload)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(payload).map_err(|e| MeillionenError::InvalidPayload {
            type_name: JsonValidator::TYPE_NAME.to_string(),
            message: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonValidator;

impl JsonValidator {
    pub const TYPE_NAME: &'static str = "json";

    fn expect_json(schema: &Schema, format: &str) -> Result<()> {
        if format == "json" {
            Ok(())
        } else {
            Err(MeillionenError::mismatch(
                &schema.name,
                "json data",
                format!("'{}' data", format),
            ))
        }
    }

    fn parse(schema: &Schema, data: &[u8]) -> Result<serde_json::Value> {
        serde_json::from_slice(data)
            .map_err(|e| MeillionenError::mismatch(&schema.name, "a JSON document", e.to_string()))
    }

    fn check_document(schema: &Schema, spec: &JsonSchema, doc: &serde_json::Value) -> Result<()> {
        match (spec.kind, doc) {
            (Some(JsonKind::Object), serde_json::Value::Object(_))
            | (Some(JsonKind::Array), serde_json::Value::Array(_))
            | (None, _) => {}
            (Some(kind), other) => {
                let expected = match kind {
                    JsonKind::Object => "a JSON object",
                    JsonKind::Array => "a JSON array",
                };
                return Err(MeillionenError::mismatch(
                    &schema.name,
                    expected,
                    describe_json(other),
                ));
            }
        }

        if spec.required_fields.is_empty() {
            return Ok(());
        }
        let objects: Vec<&serde_json::Value> = match doc {
            serde_json::Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for (idx, object) in objects.iter().enumerate() {
            let map = object.as_object().ok_or_else(|| {
                MeillionenError::mismatch(&schema.name, "JSON objects", describe_json(object))
            })?;
            if let Some(missing) = spec.required_fields.iter().find(|f| !map.contains_key(*f)) {
                return Err(MeillionenError::mismatch(
                    &schema.name,
                    format!("field '{}'", missing),
                    format!("object {} without it", idx),
                ));
            }
        }
        Ok(())
    }
}

fn describe_json(value: &serde_json::Value) -> String {
    let kind = match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    };
    format!("a JSON {}", kind)
}

impl Validator for JsonValidator {
    fn decode(&self, schema: &Schema, resource: &Resource) -> Result<Value> {
        let spec = JsonSchema::from_payload(&schema.payload)?;
        let doc = match resource {
            Resource::Inline { data, type_tag } => {
                Self::expect_json(schema, type_tag)?;
                Self::parse(schema, data)?
            }
            Resource::File { path, format } => {
                Self::expect_json(schema, format)?;
                Self::parse(schema, &read_existing(schema, path)?)?
            }
            Resource::Handle { .. } => {
                return Err(MeillionenError::mismatch(
                    &schema.name,
                    "inline data or a file",
                    resource.describe(),
                ))
            }
        };
        Self::check_document(schema, &spec, &doc)?;
        Ok(Value::Json(doc))
    }

    fn check(&self, schema: &Schema, value: &Value) -> Result<()> {
        let spec = JsonSchema::from_payload(&schema.payload)?;
        match value {
            Value::Json(doc) => Self::check_document(schema, &spec, doc),
            other => Err(MeillionenError::mismatch(
                &schema.name,
                "a JSON value",
                format!("a {} value", other.kind()),
            )),
        }
    }

    fn encode(
        &self,
        schema: &Schema,
        value: &Value,
        destination: Option<&Resource>,
    ) -> Result<Resource> {
        self.check(schema, value)?;
        let Value::Json(doc) = value else {
            return Err(MeillionenError::mismatch(&schema.name, "a JSON value", value.kind()));
        };
        let data = serde_json::to_vec_pretty(doc)?;
        match destination {
            Some(Resource::File { path, format }) => {
                Self::expect_json(schema, format)?;
                write_file(path, &data)?;
                Ok(Resource::file(path.clone(), format.clone()))
            }
            _ => Ok(Resource::inline(data, "json")),
        }
    }

    fn default_format(&self) -> &str {
        "json"
    }
}
