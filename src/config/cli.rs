use crate::domain::model::{MethodRequest, Resource};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "meillionen")]
#[command(about = "Describe and call schema-checked model interfaces")]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the module interface as JSON
    Describe {
        /// Path to the module TOML file
        #[arg(short, long)]
        config: PathBuf,

        /// Also write the binary interface envelope here
        #[arg(long)]
        envelope: Option<PathBuf>,
    },
    /// Dispatch one method call with file resources
    Call(CallArgs),
}

#[derive(Debug, Args)]
pub struct CallArgs {
    /// Path to the module TOML file
    #[arg(short, long)]
    pub config: PathBuf,

    #[arg(long)]
    pub class: String,

    #[arg(long)]
    pub method: String,

    /// Source binding, `name=path[:format]`
    #[arg(long = "source", value_parser = parse_binding)]
    pub sources: Vec<ChannelBinding>,

    /// Sink destination, `name=path[:format]`
    #[arg(long = "sink", value_parser = parse_binding)]
    pub sinks: Vec<ChannelBinding>,
}

impl CallArgs {
    pub fn to_request(&self) -> MethodRequest {
        let mut request = MethodRequest::new(&self.class, &self.method);
        for binding in &self.sources {
            request = request.with_source(&binding.name, binding.resource.clone());
        }
        for binding in &self.sinks {
            request = request.with_sink(&binding.name, binding.resource.clone());
        }
        request
    }
}

/// A channel name bound to a file on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
    pub name: String,
    pub resource: Resource,
}

/// Parses `name=path[:format]`. Without an explicit format the file
/// extension is used.
pub fn parse_binding(raw: &str) -> Result<ChannelBinding, String> {
    let (name, target) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=path[:format], got '{}'", raw))?;
    if name.is_empty() || target.is_empty() {
        return Err(format!("expected name=path[:format], got '{}'", raw));
    }

    let explicit = target
        .rsplit_once(':')
        .filter(|(path, format)| {
            !path.is_empty() && !format.is_empty() && !format.contains(['/', '\\'])
        });
    let (path, format) = match explicit {
        Some((path, format)) => (path, format.to_string()),
        None => {
            let format = Path::new(target)
                .extension()
                .and_then(|ext| ext.to_str())
                .ok_or_else(|| format!("cannot infer a format for '{}', use path:format", target))?;
            (target, format.to_string())
        }
    };

    Ok(ChannelBinding {
        name: name.to_string(),
        resource: Resource::file(path, format),
    })
}
