use crate::adapters::table::{read_existing, write_file};
use crate::domain::model::{Resource, Schema, Value};
use crate::domain::ports::Validator;
use crate::utils::error::{MeillionenError, Result};
use serde::{Deserialize, Serialize};

/// Payload of a `bytes` schema. Empty payload means no limit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BytesSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_len: Option<usize>,
}

impl BytesSchema {
    pub fn into_schema(self, name: impl Into<String>) -> Schema {
        let payload = if self.max_len.is_none() {
            Vec::new()
        } else {
            serde_json::to_vec(&self).unwrap_or_default()
        };
        Schema::new(name, BytesValidator::TYPE_NAME, payload)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(payload).map_err(|e| MeillionenError::InvalidPayload {
            type_name: BytesValidator::TYPE_NAME.to_string(),
            message: e.to_string(),
        })
    }
}

/// Raw byte buffers; any inline tag or file format is accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesValidator;

impl BytesValidator {
    pub const TYPE_NAME: &'static str = "bytes";
}

impl Validator for BytesValidator {
    fn decode(&self, schema: &Schema, resource: &Resource) -> Result<Value> {
        let data = match resource {
            Resource::Inline { data, .. } => data.clone(),
            Resource::File { path, .. } => read_existing(schema, path)?,
            Resource::Handle { .. } => {
                return Err(MeillionenError::mismatch(
                    &schema.name,
                    "inline data or a file",
                    resource.describe(),
                ))
            }
        };
        let value = Value::Bytes(data);
        self.check(schema, &value)?;
        Ok(value)
    }

    fn check(&self, schema: &Schema, value: &Value) -> Result<()> {
        let spec = BytesSchema::from_payload(&schema.payload)?;
        let Value::Bytes(data) = value else {
            return Err(MeillionenError::mismatch(
                &schema.name,
                "a byte buffer",
                format!("a {} value", value.kind()),
            ));
        };
        match spec.max_len {
            Some(max) if data.len() > max => Err(MeillionenError::mismatch(
                &schema.name,
                format!("at most {} bytes", max),
                format!("{} bytes", data.len()),
            )),
            _ => Ok(()),
        }
    }

    fn encode(
        &self,
        schema: &Schema,
        value: &Value,
        destination: Option<&Resource>,
    ) -> Result<Resource> {
        self.check(schema, value)?;
        let Value::Bytes(data) = value else {
            return Err(MeillionenError::mismatch(&schema.name, "a byte buffer", value.kind()));
        };
        match destination {
            Some(Resource::File { path, format }) => {
                write_file(path, data)?;
                Ok(Resource::file(path.clone(), format.clone()))
            }
            Some(Resource::Inline { type_tag, .. }) => {
                Ok(Resource::inline(data.clone(), type_tag.clone()))
            }
            _ => Ok(Resource::inline(data.clone(), "bin")),
        }
    }

    fn default_format(&self) -> &str {
        "bin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_len() {
        let schema = BytesSchema { max_len: Some(4) }.into_schema("blob");
        assert!(BytesValidator
            .decode(&schema, &Resource::inline(vec![1, 2, 3], "bin"))
            .is_ok());
        assert!(matches!(
            BytesValidator.decode(&schema, &Resource::inline(vec![0; 5], "bin")),
            Err(MeillionenError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_inline_round_trip_keeps_tag() {
        let schema = BytesSchema::default().into_schema("blob");
        assert!(schema.payload.is_empty());
        let resource = Resource::inline(b"\x00\x01".to_vec(), "nc");
        let value = BytesValidator.decode(&schema, &resource).unwrap();
        let back = BytesValidator
            .encode(&schema, &value, Some(&resource))
            .unwrap();
        assert_eq!(back, resource);
    }
}
