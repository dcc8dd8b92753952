//! Command-line models: sources are written to files, the program runs in a
//! fresh directory, and sinks are read back from the files it leaves behind.
//!
//! Run directory layout:
//!
//! ```text
//! <work_dir>/<class>-<method>-<timestamp>-<n>/
//!     inputs/<source>.<format>
//!     outputs/<sink>.<format>
//!     stdout.log
//!     stderr.log
//! ```

use crate::core::registry::ValidatorRegistry;
use crate::domain::model::{Resource, Schema, Values};
use crate::domain::ports::{Invocation, Invoker};
use crate::utils::error::{MeillionenError, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use tokio::process::Command;
use tokio::time::{timeout, Duration};

const STDERR_TAIL: usize = 2000;

static CHANNEL_PLACEHOLDER: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\{(source|sink):([^}]+)\}"));

/// How to run one method of a command-line model.
///
/// Arguments may contain `{inputs}`, `{outputs}`, `{run_dir}`,
/// `{source:NAME}` and `{sink:NAME}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// File format per channel name; defaults to the validator's format.
    #[serde(default)]
    pub formats: BTreeMap<String, String>,
    pub timeout_seconds: Option<u64>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn format(mut self, channel: impl Into<String>, format: impl Into<String>) -> Self {
        self.formats.insert(channel.into(), format.into());
        self
    }

    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

/// Invoker for one class whose methods are command-line programs.
pub struct CommandInvoker {
    registry: Arc<ValidatorRegistry>,
    work_dir: PathBuf,
    commands: HashMap<String, CommandSpec>,
    runs: AtomicU64,
}

impl CommandInvoker {
    pub fn new(registry: Arc<ValidatorRegistry>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            work_dir: work_dir.into(),
            commands: HashMap::new(),
            runs: AtomicU64::new(0),
        }
    }

    pub fn method(mut self, name: impl Into<String>, spec: CommandSpec) -> Self {
        self.commands.insert(name.into(), spec);
        self
    }

    fn format_for(&self, spec: &CommandSpec, schema: &Schema) -> Result<String> {
        if let Some(format) = spec.formats.get(&schema.name) {
            return Ok(format.clone());
        }
        Ok(self
            .registry
            .get(&schema.type_name)?
            .default_format()
            .to_string())
    }

    fn create_run_dir(&self, class: &str, method: &str) -> Result<PathBuf> {
        let n = self.runs.fetch_add(1, Ordering::Relaxed);
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f");
        let run_dir = self
            .work_dir
            .join(format!("{}-{}-{}-{}", class, method, stamp, n));
        std::fs::create_dir_all(run_dir.join("inputs"))?;
        std::fs::create_dir_all(run_dir.join("outputs"))?;
        // The child runs inside the run directory, so every path handed to it
        // must be absolute.
        Ok(run_dir.canonicalize()?)
    }

    fn expand_args(
        spec: &CommandSpec,
        run_dir: &Path,
        source_paths: &BTreeMap<String, PathBuf>,
        sink_paths: &BTreeMap<String, PathBuf>,
    ) -> Result<Vec<String>> {
        let channel = CHANNEL_PLACEHOLDER
            .as_ref()
            .map_err(|e| MeillionenError::execution(e.to_string()))?;

        let mut expanded = Vec::with_capacity(spec.args.len());
        for arg in &spec.args {
            let mut unresolved = None;
            let replaced = channel.replace_all(arg, |caps: &regex::Captures| {
                let paths = if &caps[1] == "source" {
                    source_paths
                } else {
                    sink_paths
                };
                match paths.get(&caps[2]) {
                    Some(path) => path.display().to_string(),
                    None => {
                        unresolved = Some(caps[0].to_string());
                        String::new()
                    }
                }
            });
            if let Some(placeholder) = unresolved {
                return Err(MeillionenError::InvalidConfigValueError {
                    field: "command.args".to_string(),
                    value: placeholder,
                    reason: "Placeholder names an undeclared channel".to_string(),
                });
            }
            let replaced = replaced
                .replace("{inputs}", &run_dir.join("inputs").display().to_string())
                .replace("{outputs}", &run_dir.join("outputs").display().to_string())
                .replace("{run_dir}", &run_dir.display().to_string());
            expanded.push(replaced);
        }
        Ok(expanded)
    }

    /// Relative program paths are resolved before the working directory changes.
    fn resolve_program(program: &str) -> Result<PathBuf> {
        let path = Path::new(program);
        if path.components().count() > 1 && path.is_relative() {
            path.canonicalize().map_err(|e| {
                MeillionenError::execution(format!("cannot resolve program '{}': {}", program, e))
            })
        } else {
            Ok(path.to_path_buf())
        }
    }
}

#[async_trait]
impl Invoker for CommandInvoker {
    async fn invoke(&self, invocation: Invocation<'_>) -> Result<Values> {
        let class = invocation.class_name;
        let method = invocation.method;
        let spec = self.commands.get(method.name()).ok_or_else(|| {
            MeillionenError::execution(format!(
                "no command configured for {}.{}",
                class,
                method.name()
            ))
        })?;

        let run_dir = self.create_run_dir(class, method.name())?;
        tracing::info!("🚀 Running {}.{} in {}", class, method.name(), run_dir.display());

        let mut source_paths = BTreeMap::new();
        for schema in method.sources() {
            let Some(value) = invocation.sources.get(&schema.name) else {
                continue;
            };
            let format = self.format_for(spec, schema)?;
            let path = run_dir
                .join("inputs")
                .join(format!("{}.{}", schema.name, format));
            self.registry.get(&schema.type_name)?.encode(
                schema,
                value,
                Some(&Resource::file(&path, &format)),
            )?;
            source_paths.insert(schema.name.clone(), path);
        }

        let mut sink_paths = BTreeMap::new();
        for schema in method.sinks() {
            let format = self.format_for(spec, schema)?;
            let path = run_dir
                .join("outputs")
                .join(format!("{}.{}", schema.name, format));
            sink_paths.insert(schema.name.clone(), (path, format));
        }
        let sink_only_paths: BTreeMap<String, PathBuf> = sink_paths
            .iter()
            .map(|(name, (path, _))| (name.clone(), path.clone()))
            .collect();

        let args = Self::expand_args(spec, &run_dir, &source_paths, &sink_only_paths)?;
        let program = Self::resolve_program(&spec.program)?;
        tracing::debug!("Command: {} {:?}", program.display(), args);

        let child = Command::new(&program)
            .args(&args)
            .envs(&spec.env)
            .current_dir(&run_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match spec.timeout_seconds {
            Some(secs) => {
                let limit = Duration::from_secs(secs);
                match timeout(limit, child).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!("⏱️ {}.{} timed out after {:?}", class, method.name(), limit);
                        return Err(MeillionenError::ExecutionTimeout { timeout: limit });
                    }
                }
            }
            None => child.await,
        }
        .map_err(|e| {
            MeillionenError::execution(format!("failed to start '{}': {}", spec.program, e))
        })?;

        std::fs::write(run_dir.join("stdout.log"), &output.stdout)?;
        std::fs::write(run_dir.join("stderr.log"), &output.stderr)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = tail_chars(stderr.trim_end(), STDERR_TAIL);
            tracing::error!("❌ {}.{} failed: {}", class, method.name(), output.status);
            return Err(MeillionenError::execution(format!(
                "'{}' exited with {}: {}",
                spec.program, output.status, tail
            )));
        }

        let mut outputs = Values::new();
        for schema in method.sinks() {
            let Some((path, format)) = sink_paths.get(&schema.name) else {
                continue;
            };
            if !path.is_file() {
                tracing::debug!("Sink '{}' not produced at {}", schema.name, path.display());
                continue;
            }
            let value = self
                .registry
                .get(&schema.type_name)?
                .decode(schema, &Resource::file(path, format))
                .map_err(|e| MeillionenError::InvalidSink {
                    name: schema.name.clone(),
                    source: Box::new(e),
                })?;
            outputs.insert(schema.name.clone(), value);
        }

        tracing::info!(
            "✅ {}.{} produced {} of {} sinks",
            class,
            method.name(),
            outputs.len(),
            method.sinks().len()
        );
        Ok(outputs)
    }
}

fn tail_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    let start = text
        .char_indices()
        .nth(count - max)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &text[start..]
}
