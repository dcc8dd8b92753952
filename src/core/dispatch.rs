use crate::core::handles::HandleStore;
use crate::core::registry::ValidatorRegistry;
use crate::domain::model::{Class, Method, MethodRequest, ModuleInterface, Resources, Values};
use crate::domain::ports::{Invocation, Invoker};
use crate::utils::error::{ErrorCategory, MeillionenError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct ClassBinding {
    class: Class,
    invoker: Arc<dyn Invoker>,
}

/// Routes method requests to registered class implementations.
///
/// Register every class before sharing the dispatcher; `dispatch` takes
/// `&self` and is safe to call concurrently for independent requests.
///
/// Dispatch is all-or-nothing towards the caller: either every declared sink
/// comes back or an error does. Side effects of a model run that failed half
/// way (files it wrote, sink files written before a later write failed) are
/// not undone.
pub struct Dispatcher {
    registry: Arc<ValidatorRegistry>,
    handles: Arc<HandleStore>,
    classes: Vec<ClassBinding>,
    timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ValidatorRegistry>) -> Self {
        Self {
            registry,
            handles: Arc::new(HandleStore::new()),
            classes: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_handles(mut self, handles: Arc<HandleStore>) -> Self {
        self.handles = handles;
        self
    }

    /// Upper bound on a single model invocation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn registry(&self) -> &Arc<ValidatorRegistry> {
        &self.registry
    }

    pub fn handles(&self) -> &Arc<HandleStore> {
        &self.handles
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn register_class(&mut self, class: Class, invoker: Arc<dyn Invoker>) -> Result<()> {
        if self.classes.iter().any(|b| b.class.name() == class.name()) {
            return Err(MeillionenError::DuplicateClass {
                class: class.name().to_string(),
            });
        }
        for method in class.methods() {
            for schema in method.sources().iter().chain(method.sinks()) {
                if !self.registry.contains(&schema.type_name) {
                    tracing::warn!(
                        "{}.{}: no validator for type name '{}' of '{}' yet",
                        class.name(),
                        method.name(),
                        schema.type_name,
                        schema.name
                    );
                }
            }
        }
        tracing::info!(
            "Registered class '{}' with {} methods",
            class.name(),
            class.methods().len()
        );
        self.classes.push(ClassBinding { class, invoker });
        Ok(())
    }

    /// The module interface this dispatcher serves, in registration order.
    pub fn interface(&self) -> ModuleInterface {
        ModuleInterface::from_unique(self.classes.iter().map(|b| b.class.clone()).collect())
    }

    pub fn class(&self, name: &str) -> Result<&Class> {
        self.binding(name).map(|b| &b.class)
    }

    pub fn resolve(&self, class: &str, method: &str) -> Result<&Method> {
        self.class(class)?.method(method)
    }

    fn binding(&self, name: &str) -> Result<&ClassBinding> {
        self.classes
            .iter()
            .find(|b| b.class.name() == name)
            .ok_or_else(|| MeillionenError::UnknownClass {
                class: name.to_string(),
            })
    }

    pub async fn dispatch(&self, request: &MethodRequest) -> Result<Resources> {
        let binding = self.binding(&request.class_name)?;
        let method = binding.class.method(&request.method_name)?;
        let started = Instant::now();
        tracing::info!(
            "📨 Dispatching {}.{}",
            request.class_name,
            request.method_name
        );

        let sources = self.validate_sources(method, &request.sources)?;
        let outputs = self.invoke(binding, method, sources).await?;
        let sinks = self.collect_sinks(method, outputs, &request.sinks)?;

        tracing::info!(
            "✅ {}.{} returned {} sinks in {:?}",
            request.class_name,
            request.method_name,
            sinks.len(),
            started.elapsed()
        );
        Ok(sinks)
    }

    /// Every declared source must be present before any is validated, so a
    /// missing source is reported ahead of a malformed one. Validation then
    /// stops at the first failure, in declaration order.
    pub fn validate_sources(&self, method: &Method, supplied: &Resources) -> Result<Values> {
        if let Some(missing) = method
            .sources()
            .iter()
            .find(|s| !supplied.contains_key(&s.name))
        {
            return Err(MeillionenError::MissingSource {
                name: missing.name.clone(),
            });
        }
        for name in supplied.keys() {
            if method.source(name).is_none() {
                tracing::warn!("{}: ignoring undeclared source '{}'", method.name(), name);
            }
        }

        let mut values = Values::new();
        for schema in method.sources() {
            let resource = &supplied[&schema.name];
            let value = self
                .registry
                .validate(schema, resource, &self.handles)
                .map_err(|e| MeillionenError::InvalidSource {
                    name: schema.name.clone(),
                    source: Box::new(e),
                })?;
            tracing::debug!("Source '{}' validated as {}", schema.name, value.kind());
            values.insert(schema.name.clone(), value);
        }
        Ok(values)
    }

    async fn invoke(&self, binding: &ClassBinding, method: &Method, sources: Values) -> Result<Values> {
        let invocation = Invocation {
            class_name: binding.class.name(),
            method,
            sources,
        };
        let call = binding.invoker.invoke(invocation);
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        "⏱️ {}.{} timed out after {:?}",
                        binding.class.name(),
                        method.name(),
                        limit
                    );
                    return Err(MeillionenError::ExecutionTimeout { timeout: limit });
                }
            },
            None => call.await,
        };

        result.map_err(|e| match e.category() {
            ErrorCategory::System => MeillionenError::execution(e.to_string()),
            _ => e,
        })
    }

    /// Checks every sink before writing any, so a missing or malformed sink
    /// leaves caller-supplied destinations untouched.
    fn collect_sinks(&self, method: &Method, outputs: Values, destinations: &Resources) -> Result<Resources> {
        let mut normalized = Values::new();
        for schema in method.sinks() {
            let value = outputs
                .get(&schema.name)
                .ok_or_else(|| MeillionenError::MissingSink {
                    name: schema.name.clone(),
                })?;
            let checked = self.registry.normalize(schema, value).and_then(|value| {
                match destinations.get(&schema.name) {
                    Some(crate::domain::model::Resource::Handle { id })
                        if !self.handles.contains(*id) =>
                    {
                        Err(MeillionenError::UnknownHandle { id: *id })
                    }
                    _ => Ok(value),
                }
            });
            let value = checked.map_err(|e| MeillionenError::InvalidSink {
                name: schema.name.clone(),
                source: Box::new(e),
            })?;
            normalized.insert(schema.name.clone(), value);
        }
        for name in outputs.keys() {
            if method.sink(name).is_none() {
                tracing::debug!("{}: dropping undeclared output '{}'", method.name(), name);
            }
        }

        let mut produced = Resources::new();
        for schema in method.sinks() {
            let resource = self
                .registry
                .encode(
                    schema,
                    &normalized[&schema.name],
                    destinations.get(&schema.name),
                    &self.handles,
                )
                .map_err(|e| MeillionenError::InvalidSink {
                    name: schema.name.clone(),
                    source: Box::new(e),
                })?;
            produced.insert(schema.name.clone(), resource);
        }
        Ok(produced)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let classes: Vec<&str> = self.classes.iter().map(|b| b.class.name()).collect();
        f.debug_struct("Dispatcher")
            .field("classes", &classes)
            .field("registry", &self.registry)
            .field("timeout", &self.timeout)
            .finish()
    }
}
