use anyhow::Context;
use clap::Parser;
use meillionen::config::cli::{CallArgs, Cli, Command, LogFormat};
use meillionen::core::wire;
use meillionen::utils::logger;
use meillionen::{ErrorCategory, MeillionenError, ModuleConfig};
use std::path::Path;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // 初始化日誌
    match cli.log_format {
        LogFormat::Compact => logger::init_cli_logger(cli.verbose),
        LogFormat::Json => logger::init_json_logger(),
    }

    let outcome = match cli.command {
        Command::Describe { config, envelope } => describe(&config, envelope.as_deref()),
        Command::Call(args) => call(args).await,
    };

    if let Err(e) = outcome {
        tracing::error!("❌ {:#}", e);
        eprintln!("❌ {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

/// 根據錯誤類別決定退出碼
fn exit_code(err: &anyhow::Error) -> i32 {
    let category = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<MeillionenError>())
        .map(MeillionenError::category);
    match category {
        Some(ErrorCategory::Validation | ErrorCategory::Routing | ErrorCategory::Lifecycle) => 2,
        Some(ErrorCategory::Execution) => 3,
        Some(ErrorCategory::Configuration | ErrorCategory::System) | None => 1,
    }
}

fn load(config: &Path) -> anyhow::Result<ModuleConfig> {
    tracing::info!("📁 Loading module definition from: {}", config.display());
    ModuleConfig::from_file(config)
        .with_context(|| format!("failed to load module file '{}'", config.display()))
}

fn describe(config: &Path, envelope: Option<&Path>) -> anyhow::Result<()> {
    let module = load(config)?;
    let interface = module.build_dispatcher()?.interface();

    println!("{}", serde_json::to_string_pretty(&interface)?);

    if let Some(out) = envelope {
        let bytes = wire::to_bytes(&interface)?;
        std::fs::write(out, &bytes)
            .with_context(|| format!("failed to write envelope '{}'", out.display()))?;
        tracing::info!("💾 Wrote {} byte envelope to {}", bytes.len(), out.display());
    }
    Ok(())
}

async fn call(args: CallArgs) -> anyhow::Result<()> {
    let module = load(&args.config)?;
    let dispatcher = module.build_dispatcher()?;

    let request = args.to_request();
    let sinks = dispatcher.dispatch(&request).await?;
    println!("{}", serde_json::to_string_pretty(&sinks)?);
    Ok(())
}
