use crate::adapters::{BytesValidator, JsonValidator, TableValidator};
use crate::core::handles::HandleStore;
use crate::domain::model::{Resource, Schema, Value};
use crate::domain::ports::Validator;
use crate::utils::error::{MeillionenError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Maps schema type tags to validators.
///
/// Populate it first, then share it behind an `Arc`: after construction the
/// registry is only read, so concurrent dispatches need no locking.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    validators: HashMap<String, Arc<dyn Validator>>,
}

impl std::fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("type_names", &self.type_names())
            .finish()
    }
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `table`, `json` and `bytes` validators installed.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.validators.insert(
            TableValidator::TYPE_NAME.to_string(),
            Arc::new(TableValidator),
        );
        registry.validators.insert(
            JsonValidator::TYPE_NAME.to_string(),
            Arc::new(JsonValidator),
        );
        registry.validators.insert(
            BytesValidator::TYPE_NAME.to_string(),
            Arc::new(BytesValidator),
        );
        registry
    }

    /// Installs a validator. Replacing an existing one is not supported.
    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        validator: impl Validator + 'static,
    ) -> Result<()> {
        let type_name = type_name.into();
        if self.validators.contains_key(&type_name) {
            return Err(MeillionenError::DuplicateTypeName { type_name });
        }
        tracing::debug!("Registered validator for type name '{}'", type_name);
        self.validators.insert(type_name, Arc::new(validator));
        Ok(())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.validators.contains_key(type_name)
    }

    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.validators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn get(&self, type_name: &str) -> Result<&dyn Validator> {
        self.validators
            .get(type_name)
            .map(|v| &**v)
            .ok_or_else(|| MeillionenError::UnknownTypeName {
                type_name: type_name.to_string(),
            })
    }

    /// Checks `resource` against `schema` and returns its native value.
    pub fn validate(
        &self,
        schema: &Schema,
        resource: &Resource,
        handles: &HandleStore,
    ) -> Result<Value> {
        let validator = self.get(&schema.type_name)?;
        match resource {
            Resource::Handle { id } => {
                let value = handles
                    .get(*id)
                    .ok_or(MeillionenError::UnknownHandle { id: *id })?;
                validator.normalize(schema, &value)
            }
            _ => validator.decode(schema, resource),
        }
    }

    /// Checks a native value and returns it in declared form.
    pub fn normalize(&self, schema: &Schema, value: &Value) -> Result<Value> {
        self.get(&schema.type_name)?.normalize(schema, value)
    }

    /// Produces a resource for `value`, written to `destination` when given.
    pub fn encode(
        &self,
        schema: &Schema,
        value: &Value,
        destination: Option<&Resource>,
        handles: &HandleStore,
    ) -> Result<Resource> {
        let validator = self.get(&schema.type_name)?;
        match destination {
            Some(Resource::Handle { id }) => {
                let value = validator.normalize(schema, value)?;
                if handles.replace(*id, value) {
                    Ok(Resource::Handle { id: *id })
                } else {
                    Err(MeillionenError::UnknownHandle { id: *id })
                }
            }
            other => validator.encode(schema, value, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::table::TableSchema;
    use crate::domain::table::{Cell, Column, DataType, Table};

    struct AcceptAll;

    impl Validator for AcceptAll {
        fn decode(&self, _schema: &Schema, _resource: &Resource) -> Result<Value> {
            Ok(Value::Bytes(Vec::new()))
        }

        fn check(&self, _schema: &Schema, _value: &Value) -> Result<()> {
            Ok(())
        }

        fn encode(
            &self,
            _schema: &Schema,
            _value: &Value,
            _destination: Option<&Resource>,
        ) -> Result<Resource> {
            Ok(Resource::inline(Vec::new(), "raw"))
        }

        fn default_format(&self) -> &str {
            "raw"
        }
    }

    fn daily_schema() -> Schema {
        TableSchema::new()
            .column("doy", DataType::Int)
            .column("rain", DataType::Float)
            .into_schema("daily")
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ValidatorRegistry::with_builtins();
        assert!(registry.register("custom", AcceptAll).is_ok());
        assert!(matches!(
            registry.register("custom", AcceptAll),
            Err(MeillionenError::DuplicateTypeName { ref type_name }) if type_name == "custom"
        ));
        assert!(matches!(
            registry.register("table", AcceptAll),
            Err(MeillionenError::DuplicateTypeName { .. })
        ));
        assert_eq!(registry.type_names(), vec!["bytes", "custom", "json", "table"]);
    }

    #[test]
    fn test_unknown_type_name() {
        let registry = ValidatorRegistry::with_builtins();
        let handles = HandleStore::new();
        let schema = Schema::new("grid", "netcdf", Vec::new());
        let resource = Resource::file("grid.nc", "netcdf");
        assert!(matches!(
            registry.validate(&schema, &resource, &handles),
            Err(MeillionenError::UnknownTypeName { ref type_name }) if type_name == "netcdf"
        ));
    }

    #[test]
    fn test_handle_resources_are_resolved() {
        let registry = ValidatorRegistry::with_builtins();
        let handles = HandleStore::new();
        let schema = daily_schema();

        let value = registry
            .validate(&schema, &Resource::inline("doy,rain\n1,0.5\n", "csv"), &handles)
            .unwrap();
        let id = handles.insert(value.clone());

        let resolved = registry
            .validate(&schema, &Resource::handle(id), &handles)
            .unwrap();
        assert_eq!(resolved, value);

        assert!(matches!(
            registry.validate(&schema, &Resource::handle(id + 100), &handles),
            Err(MeillionenError::UnknownHandle { .. })
        ));

        let wrong = handles.insert(Value::Bytes(vec![0]));
        assert!(matches!(
            registry.validate(&schema, &Resource::handle(wrong), &handles),
            Err(MeillionenError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_handle_table_matches_inline_column_order() {
        let registry = ValidatorRegistry::with_builtins();
        let handles = HandleStore::new();
        let schema = daily_schema();

        let shuffled = Table::new(vec![
            Column::new("rain", DataType::Float),
            Column::new("doy", DataType::Int),
        ])
        .with_rows(vec![vec![Cell::Float(0.5), Cell::Int(1)]]);
        let id = handles.insert(Value::Table(shuffled));

        let via_handle = registry
            .validate(&schema, &Resource::handle(id), &handles)
            .unwrap();
        let via_inline = registry
            .validate(&schema, &Resource::inline("rain,doy\n0.5,1\n", "csv"), &handles)
            .unwrap();
        assert_eq!(via_handle, via_inline);
        assert_eq!(via_handle.as_table().unwrap().column_names(), vec!["doy", "rain"]);

        let slot = handles.insert(Value::Bytes(Vec::new()));
        let stored = handles.get(id).unwrap();
        registry
            .encode(&schema, &stored, Some(&Resource::handle(slot)), &handles)
            .unwrap();
        assert_eq!(handles.get(slot), Some(via_inline));
    }

    #[test]
    fn test_encode_into_handle_destination() {
        let registry = ValidatorRegistry::with_builtins();
        let handles = HandleStore::new();
        let schema = daily_schema();
        let value = registry
            .validate(&schema, &Resource::inline("doy,rain\n1,0.5\n", "csv"), &handles)
            .unwrap();

        let slot = handles.insert(Value::Bytes(Vec::new()));
        let resource = registry
            .encode(&schema, &value, Some(&Resource::handle(slot)), &handles)
            .unwrap();
        assert_eq!(resource, Resource::handle(slot));
        assert_eq!(handles.get(slot), Some(value));
    }

    #[test]
    fn test_validation_is_repeatable() {
        let registry = ValidatorRegistry::with_builtins();
        let handles = HandleStore::new();
        let schema = daily_schema();
        let resource = Resource::inline("rain,doy\n0.5,1\n", "csv");
        let before = (schema.clone(), resource.clone());

        let first = registry.validate(&schema, &resource, &handles).unwrap();
        let second = registry.validate(&schema, &resource, &handles).unwrap();
        assert_eq!(first, second);
        assert_eq!((schema, resource), before);
    }
}
