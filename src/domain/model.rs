use crate::domain::table::Table;
use crate::utils::error::{MeillionenError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Declared shape of one data channel. The payload is only ever read by the
/// validator registered under `type_name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub type_name: String,
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl Schema {
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            payload: payload.into(),
        }
    }
}

pub type HandleId = u64;

/// A concrete value, or a reference to one, checked against a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resource {
    Inline { data: Vec<u8>, type_tag: String },
    File { path: PathBuf, format: String },
    Handle { id: HandleId },
}

impl Resource {
    pub fn inline(data: impl Into<Vec<u8>>, type_tag: impl Into<String>) -> Self {
        Resource::Inline {
            data: data.into(),
            type_tag: type_tag.into(),
        }
    }

    pub fn file(path: impl Into<PathBuf>, format: impl Into<String>) -> Self {
        Resource::File {
            path: path.into(),
            format: format.into(),
        }
    }

    pub fn handle(id: HandleId) -> Self {
        Resource::Handle { id }
    }

    /// Short description used in mismatch messages.
    pub fn describe(&self) -> String {
        match self {
            Resource::Inline { data, type_tag } => {
                format!("inline '{}' data ({} bytes)", type_tag, data.len())
            }
            Resource::File { path, format } => {
                format!("'{}' file {}", format, path.display())
            }
            Resource::Handle { id } => format!("handle {}", id),
        }
    }
}

/// Native value a validator produces from a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Table(Table),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Table(_) => "table",
            Value::Json(_) => "json",
            Value::Bytes(_) => "bytes",
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(table) => Some(table),
            _ => None,
        }
    }
}

pub type Resources = BTreeMap<String, Resource>;
pub type Values = BTreeMap<String, Value>;

/// A named operation with declared source and sink schemas, kept in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MethodDef")]
pub struct Method {
    name: String,
    sources: Vec<Schema>,
    sinks: Vec<Schema>,
}

#[derive(Deserialize)]
struct MethodDef {
    name: String,
    #[serde(default)]
    sources: Vec<Schema>,
    #[serde(default)]
    sinks: Vec<Schema>,
}

impl TryFrom<MethodDef> for Method {
    type Error = MeillionenError;

    fn try_from(def: MethodDef) -> Result<Self> {
        Method::new(def.name, def.sources, def.sinks)
    }
}

impl Method {
    pub fn new(name: impl Into<String>, sources: Vec<Schema>, sinks: Vec<Schema>) -> Result<Self> {
        let name = name.into();
        ensure_unique_schemas(&name, &sources)?;
        ensure_unique_schemas(&name, &sinks)?;
        Ok(Self {
            name,
            sources,
            sinks,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sources(&self) -> &[Schema] {
        &self.sources
    }

    pub fn sinks(&self) -> &[Schema] {
        &self.sinks
    }

    pub fn source(&self, name: &str) -> Option<&Schema> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn sink(&self, name: &str) -> Option<&Schema> {
        self.sinks.iter().find(|s| s.name == name)
    }
}

fn ensure_unique_schemas(method: &str, schemas: &[Schema]) -> Result<()> {
    let mut seen = HashSet::new();
    for schema in schemas {
        if !seen.insert(schema.name.as_str()) {
            return Err(MeillionenError::DuplicateSchema {
                method: method.to_string(),
                name: schema.name.clone(),
            });
        }
    }
    Ok(())
}

/// A wrapped model: a named group of methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ClassDef")]
pub struct Class {
    name: String,
    methods: Vec<Method>,
}

#[derive(Deserialize)]
struct ClassDef {
    name: String,
    #[serde(default)]
    methods: Vec<Method>,
}

impl TryFrom<ClassDef> for Class {
    type Error = MeillionenError;

    fn try_from(def: ClassDef) -> Result<Self> {
        Class::new(def.name, def.methods)
    }
}

impl Class {
    pub fn new(name: impl Into<String>, methods: Vec<Method>) -> Result<Self> {
        let name = name.into();
        let mut seen = HashSet::new();
        for method in &methods {
            if !seen.insert(method.name()) {
                return Err(MeillionenError::DuplicateMethod {
                    class: name,
                    method: method.name().to_string(),
                });
            }
        }
        Ok(Self { name, methods })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn method(&self, name: &str) -> Result<&Method> {
        self.methods
            .iter()
            .find(|m| m.name() == name)
            .ok_or_else(|| MeillionenError::UnknownMethod {
                class: self.name.clone(),
                method: name.to_string(),
            })
    }
}

/// Everything one wrapped program exposes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "ModuleDef")]
pub struct ModuleInterface {
    classes: Vec<Class>,
}

#[derive(Deserialize)]
struct ModuleDef {
    #[serde(default)]
    classes: Vec<Class>,
}

impl TryFrom<ModuleDef> for ModuleInterface {
    type Error = MeillionenError;

    fn try_from(def: ModuleDef) -> Result<Self> {
        ModuleInterface::new(def.classes)
    }
}

impl ModuleInterface {
    pub fn new(classes: Vec<Class>) -> Result<Self> {
        let mut seen = HashSet::new();
        for class in &classes {
            if !seen.insert(class.name()) {
                return Err(MeillionenError::DuplicateClass {
                    class: class.name().to_string(),
                });
            }
        }
        Ok(Self { classes })
    }

    /// For class lists whose names are already known to be unique.
    pub(crate) fn from_unique(classes: Vec<Class>) -> Self {
        Self { classes }
    }

    pub fn classes(&self) -> &[Class] {
        &self.classes
    }

    pub fn class(&self, name: &str) -> Result<&Class> {
        self.classes
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| MeillionenError::UnknownClass {
                class: name.to_string(),
            })
    }

    pub fn method(&self, class: &str, method: &str) -> Result<&Method> {
        self.class(class)?.method(method)
    }
}

/// Routing envelope for one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRequest {
    pub class_name: String,
    pub method_name: String,
    #[serde(default)]
    pub sources: Resources,
    #[serde(default)]
    pub sinks: Resources,
}

impl MethodRequest {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            sources: Resources::new(),
            sinks: Resources::new(),
        }
    }

    pub fn with_source(mut self, name: impl Into<String>, resource: Resource) -> Self {
        self.sources.insert(name.into(), resource);
        self
    }

    pub fn with_sink(mut self, name: impl Into<String>, resource: Resource) -> Self {
        self.sinks.insert(name.into(), resource);
        self
    }
}
