use crate::adapters::{
    BytesSchema, BytesValidator, CommandInvoker, CommandSpec, JsonSchema, JsonValidator,
    TableSchema, TableValidator,
};
use crate::core::{Dispatcher, ValidatorRegistry};
use crate::domain::model::{Class, Method, ModuleInterface, Schema};
use crate::utils::error::{MeillionenError, Result};
use crate::utils::validation::{
    validate_identifier, validate_path, validate_positive_number, validate_required_field,
    validate_unique_names, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

pub const DEFAULT_WORK_DIR: &str = "./runs";

static ENV_VAR: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}"));

/// 模組定義檔 (TOML)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub module: ModuleSection,
    #[serde(default)]
    pub classes: Vec<ClassConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSection {
    pub name: String,
    pub work_dir: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassConfig {
    pub name: String,
    #[serde(default)]
    pub methods: Vec<MethodConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodConfig {
    pub name: String,
    pub command: Option<CommandSpec>,
    #[serde(default)]
    pub sources: Vec<SchemaConfig>,
    #[serde(default)]
    pub sinks: Vec<SchemaConfig>,
}

/// One source or sink. At most one of `table`, `json`, `bytes` or `payload`
/// may be given; `type_name` defaults to the builder section used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub name: String,
    pub type_name: Option<String>,
    pub table: Option<TableSchema>,
    pub json: Option<JsonSchema>,
    pub bytes: Option<BytesSchema>,
    /// Raw payload for type names without a builder section.
    pub payload: Option<String>,
}

impl SchemaConfig {
    pub fn to_schema(&self) -> Result<Schema> {
        let field = format!("schema '{}'", self.name);
        let sections = [
            self.table.is_some(),
            self.json.is_some(),
            self.bytes.is_some(),
            self.payload.is_some(),
        ];
        if sections.iter().filter(|given| **given).count() > 1 {
            return Err(MeillionenError::InvalidConfigValueError {
                field,
                value: self.name.clone(),
                reason: "Only one of table, json, bytes or payload may be given".to_string(),
            });
        }

        let built = if let Some(table) = &self.table {
            Some(table.clone().into_schema(&self.name))
        } else if let Some(json) = &self.json {
            Some(json.clone().into_schema(&self.name))
        } else {
            self.bytes
                .as_ref()
                .map(|bytes| bytes.clone().into_schema(&self.name))
        };

        match (built, &self.type_name) {
            (Some(schema), Some(type_name)) if *type_name != schema.type_name => {
                Err(MeillionenError::InvalidConfigValueError {
                    field: format!("{}.type_name", field),
                    value: type_name.clone(),
                    reason: format!("Builder section is for '{}'", schema.type_name),
                })
            }
            (Some(schema), _) => Ok(schema),
            (None, Some(type_name)) => Ok(Schema::new(
                &self.name,
                type_name,
                self.payload.clone().unwrap_or_default(),
            )),
            (None, None) => Err(MeillionenError::MissingConfigError {
                field: format!("{}.type_name", field),
            }),
        }
    }
}

impl MethodConfig {
    pub fn to_method(&self) -> Result<Method> {
        let sources = self
            .sources
            .iter()
            .map(SchemaConfig::to_schema)
            .collect::<Result<Vec<_>>>()?;
        let sinks = self
            .sinks
            .iter()
            .map(SchemaConfig::to_schema)
            .collect::<Result<Vec<_>>>()?;
        Method::new(&self.name, sources, sinks)
    }
}

impl ClassConfig {
    pub fn to_class(&self) -> Result<Class> {
        let methods = self
            .methods
            .iter()
            .map(MethodConfig::to_method)
            .collect::<Result<Vec<_>>>()?;
        Class::new(&self.name, methods)
    }
}

impl ModuleConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content)?;
        toml::from_str(&processed).map_err(|e| MeillionenError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${MODEL_HOME})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = ENV_VAR.as_ref().map_err(|e| MeillionenError::ConfigError {
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn work_dir(&self) -> PathBuf {
        PathBuf::from(self.module.work_dir.as_deref().unwrap_or(DEFAULT_WORK_DIR))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.module.timeout_seconds.map(Duration::from_secs)
    }

    /// The declared interface, without binding any invokers.
    pub fn interface(&self) -> Result<ModuleInterface> {
        let classes = self
            .classes
            .iter()
            .map(ClassConfig::to_class)
            .collect::<Result<Vec<_>>>()?;
        ModuleInterface::new(classes)
    }

    /// Validates the file and binds every class to a [`CommandInvoker`].
    pub fn build_dispatcher(&self) -> Result<Dispatcher> {
        self.validate()?;

        let registry = Arc::new(ValidatorRegistry::with_builtins());
        let mut dispatcher = Dispatcher::new(Arc::clone(&registry));
        if let Some(timeout) = self.timeout() {
            dispatcher = dispatcher.with_timeout(timeout);
        }

        let work_dir = self.work_dir();
        for class in &self.classes {
            let mut invoker = CommandInvoker::new(Arc::clone(&registry), &work_dir);
            for method in &class.methods {
                let command = validate_required_field(
                    &format!("{}.{}.command", class.name, method.name),
                    &method.command,
                )?;
                invoker = invoker.method(&method.name, command.clone());
            }
            dispatcher.register_class(class.to_class()?, Arc::new(invoker))?;
        }

        tracing::info!(
            "📦 Module '{}' ready with {} classes",
            self.module.name,
            self.classes.len()
        );
        Ok(dispatcher)
    }
}

fn validate_schema_config(owner: &str, schema: &SchemaConfig) -> Result<()> {
    validate_identifier(&format!("{}.name", owner), &schema.name)?;
    let built = schema.to_schema()?;
    // Built-in payloads are parsed now so a typo fails at load time.
    match built.type_name.as_str() {
        TableValidator::TYPE_NAME => TableSchema::from_payload(&built.payload).map(|_| ()),
        JsonValidator::TYPE_NAME => JsonSchema::from_payload(&built.payload).map(|_| ()),
        BytesValidator::TYPE_NAME => BytesSchema::from_payload(&built.payload).map(|_| ()),
        _ => Ok(()),
    }
}

impl Validate for ModuleConfig {
    fn validate(&self) -> Result<()> {
        validate_identifier("module.name", &self.module.name)?;
        if let Some(work_dir) = &self.module.work_dir {
            validate_path("module.work_dir", work_dir)?;
        }
        if let Some(timeout) = self.module.timeout_seconds {
            validate_positive_number("module.timeout_seconds", timeout, 1)?;
        }
        if self.classes.is_empty() {
            return Err(MeillionenError::MissingConfigError {
                field: "classes".to_string(),
            });
        }
        validate_unique_names("classes", self.classes.iter().map(|c| c.name.as_str()))?;

        for class in &self.classes {
            validate_identifier("classes.name", &class.name)?;
            validate_unique_names(
                &format!("{}.methods", class.name),
                class.methods.iter().map(|m| m.name.as_str()),
            )?;

            for method in &class.methods {
                let owner = format!("{}.{}", class.name, method.name);
                validate_identifier(&format!("{}.name", owner), &method.name)?;

                let command =
                    validate_required_field(&format!("{}.command", owner), &method.command)?;
                validate_path(&format!("{}.command.program", owner), &command.program)?;
                if let Some(timeout) = command.timeout_seconds {
                    validate_positive_number(
                        &format!("{}.command.timeout_seconds", owner),
                        timeout,
                        1,
                    )?;
                }

                validate_unique_names(
                    &format!("{}.sources", owner),
                    method.sources.iter().map(|s| s.name.as_str()),
                )?;
                validate_unique_names(
                    &format!("{}.sinks", owner),
                    method.sinks.iter().map(|s| s.name.as_str()),
                )?;
                for schema in &method.sources {
                    validate_schema_config(&format!("{}.sources", owner), schema)?;
                }
                for schema in &method.sinks {
                    validate_schema_config(&format!("{}.sinks", owner), schema)?;
                }
            }
        }
        Ok(())
    }
}
