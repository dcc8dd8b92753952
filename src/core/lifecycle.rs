//! Stateful initialize / update / finalize wrapper over one method of a
//! class, in the style of the Basic Model Interface.
//!
//! A [`ModelHandle`] has a single owner. Every mutating call takes
//! `&mut self`, so the borrow checker serializes `set_value`, `update` and
//! `get_value` on the same handle; share one across tasks only behind a
//! `tokio::sync::Mutex`.

use crate::core::dispatch::Dispatcher;
use crate::domain::model::{Method, MethodRequest, Resource, Resources, Schema};
use crate::utils::error::{MeillionenError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_METHOD: &str = "run";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Uninitialized,
    Initialized,
    Finalized,
}

impl std::fmt::Display for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelState::Uninitialized => "uninitialized",
            ModelState::Initialized => "initialized",
            ModelState::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// Settings for [`ModelHandle::initialize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Method each `update` dispatches to.
    #[serde(default = "default_method")]
    pub method: String,
    /// Sources bound up front, as if passed to `set_value`.
    #[serde(default)]
    pub inputs: Resources,
    /// Where each `update` writes its sinks. Unlisted sinks come back inline.
    #[serde(default)]
    pub sinks: Resources,
}

fn default_method() -> String {
    DEFAULT_METHOD.to_string()
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            inputs: Resources::new(),
            sinks: Resources::new(),
        }
    }
}

impl LifecycleConfig {
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn input(mut self, name: impl Into<String>, resource: Resource) -> Self {
        self.inputs.insert(name.into(), resource);
        self
    }

    pub fn sink(mut self, name: impl Into<String>, destination: Resource) -> Self {
        self.sinks.insert(name.into(), destination);
        self
    }
}

#[derive(Debug)]
struct ModelInstance {
    method: Method,
    inputs: Resources,
    outputs: Resources,
    destinations: Resources,
    updates: u64,
}

#[derive(Debug)]
pub struct ModelHandle {
    dispatcher: Arc<Dispatcher>,
    class_name: String,
    state: ModelState,
    instance: Option<ModelInstance>,
}

impl ModelHandle {
    /// Fails with `UnknownClass` when the dispatcher does not serve `class_name`.
    pub fn new(dispatcher: Arc<Dispatcher>, class_name: impl Into<String>) -> Result<Self> {
        let class_name = class_name.into();
        dispatcher.class(&class_name)?;
        Ok(Self {
            dispatcher,
            class_name,
            state: ModelState::Uninitialized,
            instance: None,
        })
    }

    pub fn component_name(&self) -> &str {
        &self.class_name
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn update_count(&self) -> Result<u64> {
        Ok(self.instance()?.updates)
    }

    pub fn initialize(&mut self, config: LifecycleConfig) -> Result<()> {
        match self.state {
            ModelState::Uninitialized => {}
            ModelState::Initialized => return Err(MeillionenError::AlreadyInitialized),
            ModelState::Finalized => return Err(MeillionenError::AlreadyFinalized),
        }

        let method = self
            .dispatcher
            .resolve(&self.class_name, &config.method)?
            .clone();

        for name in config.sinks.keys() {
            if method.sink(name).is_none() {
                return Err(MeillionenError::UnknownVariable { name: name.clone() });
            }
        }
        let mut inputs = Resources::new();
        for (name, resource) in config.inputs {
            self.check_input(&method, &name, &resource)?;
            inputs.insert(name, resource);
        }

        tracing::info!(
            "🔧 Initialized {} ({}, {} inputs pre-bound)",
            self.class_name,
            method.name(),
            inputs.len()
        );
        self.instance = Some(ModelInstance {
            method,
            inputs,
            outputs: Resources::new(),
            destinations: config.sinks,
            updates: 0,
        });
        self.state = ModelState::Initialized;
        Ok(())
    }

    pub fn get_input_var_names(&self) -> Result<Vec<&str>> {
        let instance = self.instance()?;
        Ok(instance.method.sources().iter().map(|s| s.name.as_str()).collect())
    }

    pub fn get_output_var_names(&self) -> Result<Vec<&str>> {
        let instance = self.instance()?;
        Ok(instance.method.sinks().iter().map(|s| s.name.as_str()).collect())
    }

    pub fn get_input_var_type(&self, name: &str) -> Result<&Schema> {
        self.instance()?
            .method
            .source(name)
            .ok_or_else(|| MeillionenError::UnknownVariable {
                name: name.to_string(),
            })
    }

    pub fn get_output_var_type(&self, name: &str) -> Result<&Schema> {
        self.instance()?
            .method
            .sink(name)
            .ok_or_else(|| MeillionenError::UnknownVariable {
                name: name.to_string(),
            })
    }

    /// Validates `resource` against the input's schema and binds it for the
    /// next `update`. A binding stays in place until it is set again.
    pub fn set_value(&mut self, name: &str, resource: Resource) -> Result<()> {
        let instance = self.instance()?;
        self.check_input(&instance.method, name, &resource)?;
        tracing::debug!("{}: bound '{}' to {}", self.class_name, name, resource.describe());
        self.instance_mut()?
            .inputs
            .insert(name.to_string(), resource);
        Ok(())
    }

    /// Runs the method once with the bound inputs.
    ///
    /// Missing inputs are reported before the model is touched. A timeout
    /// finalizes the handle since the model may have been left mid-step.
    pub async fn update(&mut self) -> Result<()> {
        let instance = self.instance()?;
        if let Some(missing) = instance
            .method
            .sources()
            .iter()
            .find(|s| !instance.inputs.contains_key(&s.name))
        {
            return Err(MeillionenError::MissingRequiredInput {
                name: missing.name.clone(),
            });
        }

        let request = MethodRequest {
            class_name: self.class_name.clone(),
            method_name: instance.method.name().to_string(),
            sources: instance.inputs.clone(),
            sinks: instance.destinations.clone(),
        };
        let step = instance.updates + 1;

        let outcome = self.dispatcher.dispatch(&request).await;
        match outcome {
            Ok(outputs) => {
                let instance = self.instance_mut()?;
                instance.outputs = outputs;
                instance.updates = step;
                tracing::info!("{}: update {} complete", self.class_name, step);
                Ok(())
            }
            Err(err @ MeillionenError::ExecutionTimeout { .. }) => {
                tracing::warn!("{}: finalizing after timeout in update {}", self.class_name, step);
                self.release();
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Current value of an output, as produced by the latest `update`.
    pub fn get_value(&self, name: &str) -> Result<&Resource> {
        let instance = self.instance()?;
        if instance.method.sink(name).is_none() {
            return Err(MeillionenError::UnknownVariable {
                name: name.to_string(),
            });
        }
        instance
            .outputs
            .get(name)
            .ok_or_else(|| MeillionenError::ValueNotYetAvailable {
                name: name.to_string(),
            })
    }

    pub fn finalize(&mut self) -> Result<()> {
        match self.state {
            ModelState::Uninitialized => Err(MeillionenError::NotInitialized),
            ModelState::Finalized => Err(MeillionenError::AlreadyFinalized),
            ModelState::Initialized => {
                self.release();
                tracing::info!("🏁 Finalized {}", self.class_name);
                Ok(())
            }
        }
    }

    fn release(&mut self) {
        self.instance = None;
        self.state = ModelState::Finalized;
    }

    fn check_input(&self, method: &Method, name: &str, resource: &Resource) -> Result<()> {
        let schema = method
            .source(name)
            .ok_or_else(|| MeillionenError::UnknownVariable {
                name: name.to_string(),
            })?;
        self.dispatcher
            .registry()
            .validate(schema, resource, self.dispatcher.handles())
            .map(|_| ())
            .map_err(|e| MeillionenError::InvalidVariable {
                name: name.to_string(),
                source: Box::new(e),
            })
    }

    fn instance(&self) -> Result<&ModelInstance> {
        match self.state {
            ModelState::Uninitialized => Err(MeillionenError::NotInitialized),
            ModelState::Finalized => Err(MeillionenError::AlreadyFinalized),
            ModelState::Initialized => self.instance.as_ref().ok_or(MeillionenError::NotInitialized),
        }
    }

    fn instance_mut(&mut self) -> Result<&mut ModelInstance> {
        match self.state {
            ModelState::Uninitialized => Err(MeillionenError::NotInitialized),
            ModelState::Finalized => Err(MeillionenError::AlreadyFinalized),
            ModelState::Initialized => self.instance.as_mut().ok_or(MeillionenError::NotInitialized),
        }
    }
}
