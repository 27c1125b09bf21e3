use clap::Parser;
use mare_cli::commands::{cli, profiles, submit};
use mare_core::api::{CliError, ErrorCode, LoggingConfig, Pipeline};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

async fn real_main() -> Result<i32, CliError> {
    let args = cli::Args::parse();
    let cfg = match &args.config {
        Some(path) => mare_core::api::load_from_path(path).map(|mut cfg| {
            mare_core::config::apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
            cfg
        }),
        None => mare_core::api::load_default(),
    }
    .map_err(|e| CliError::Config(e.to_string()))?;
    cfg.validate().map_err(CliError::Config)?;
    init_tracing(&cfg.logging).map_err(CliError::Config)?;

    let pipeline = mare_plugins::factory::build_pipeline(cfg)
        .await
        .map_err(|e| match e.downcast::<CliError>() {
            Ok(cli_err) => cli_err,
            Err(e) => CliError::Config(format!("{e:#}")),
        })?;

    dispatch(args.command, &pipeline).await
}

async fn dispatch(cmd: cli::Commands, pipeline: &Pipeline) -> Result<i32, CliError> {
    match cmd {
        cli::Commands::Submit(submit_args) => submit::run_submit(pipeline, submit_args).await,
        cli::Commands::Profiles(profiles_cmd) => profiles::run_profiles(pipeline, profiles_cmd).await,
    }
}

fn exit_code_for_error(e: &CliError) -> i32 {
    // 0: success
    // 2: task escalated (returned as a normal exit code, not as an error)
    // 11: config error
    // 12: validation error
    // 13: profile not found
    // 14: version conflict
    // 20: IO / backing store unavailable
    // 50: internal/uncategorized
    match e.error_code() {
        Some(ErrorCode::ConfigError) => 11,
        Some(ErrorCode::ValidationError) => 12,
        Some(ErrorCode::NotFound) => 13,
        Some(ErrorCode::Conflict) => 14,
        Some(ErrorCode::Unavailable) => 20,
        Some(_) => 50,
        None => match e {
            CliError::Io(_) | CliError::Command(_) => 20,
            _ => 50,
        },
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<(), String> {
    if !logging.enabled {
        return Ok(());
    }

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(logging.level.clone()).map_err(|e| e.to_string())?,
    };

    let mut maybe_writer = None;

    if logging.file {
        let dir = match logging
            .directory
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(d) => std::path::PathBuf::from(shellexpand::tilde(d).into_owned()),
            None => std::env::temp_dir().join("mare-cli"),
        };

        std::fs::create_dir_all(&dir).map_err(|e| format!("create log dir failed: {e}"))?;
        let file_name = format!("mare-cli.{}.log", std::process::id());
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        maybe_writer = Some(non_blocking);
    }

    if !logging.console && maybe_writer.is_none() {
        return Err("logging disabled for both console and file".to_string());
    }

    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
    });

    let file_layer = maybe_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}
