use std::env;
use std::error::Error;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nlsql_adapters::websocket::WebSocketConnector;
use nlsql_core::chat_session::ChatSession;
use nlsql_core::config::{ClientConfig, ConfigError, CONFIG_FILE_NAME};
use nlsql_core::connection_manager::{
    ConnectionCommands, ConnectionHandle, ConnectionManager, SocketConnector,
};
use nlsql_core::local_store::{default_config_dir, FileKeyValueStore, StoreError};
use nlsql_core::settings::{load_history, HistoryEntry, SettingsDialog, UserSettings};
use nlsql_tui::{ChatTui, TuiError};
use thiserror::Error;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "NLSQL_LOG";
const LOG_FILE_NAME: &str = "nlsql.log";
const DEFAULT_LOG_FILTER: &str = "info";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const USAGE: &str = "\
Usage: nlsql-app [OPTIONS]

Options:
  --endpoint <url>      websocket endpoint of the agent (ws:// or wss://)
  --config-dir <path>   directory holding config.toml, history and logs
  -h, --help            print this help

Environment:
  NLSQL_WEBSOCKET_URL   endpoint override (the flag wins)
  NLSQL_CONFIG_DIR      config directory override (the flag wins)
  NLSQL_LOG             tracing filter, default `info`";

#[derive(Debug, Error)]
enum AppError {
    #[error("{0}\n\n{usage}", usage = USAGE)]
    Usage(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to prepare log directory {path}: {source}")]
    Logging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to install log subscriber: {0}")]
    Subscriber(#[source] Box<dyn Error + Send + Sync>),
    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] io::Error),
    #[error(transparent)]
    Tui(#[from] TuiError),
}

#[derive(Debug, Default, PartialEq, Eq)]
struct CliArgs {
    endpoint: Option<String>,
    config_dir: Option<PathBuf>,
    help: bool,
}

fn parse_args_from(args: impl IntoIterator<Item = String>) -> Result<CliArgs, AppError> {
    let mut parsed = CliArgs::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => parsed.help = true,
            "--endpoint" => {
                let value = args
                    .next()
                    .ok_or_else(|| AppError::Usage("--endpoint needs a value".to_string()))?;
                parsed.endpoint = Some(value);
            }
            "--config-dir" => {
                let value = args
                    .next()
                    .ok_or_else(|| AppError::Usage("--config-dir needs a value".to_string()))?;
                parsed.config_dir = Some(PathBuf::from(value));
            }
            other => {
                if let Some(value) = other.strip_prefix("--endpoint=") {
                    parsed.endpoint = Some(value.to_string());
                } else if let Some(value) = other.strip_prefix("--config-dir=") {
                    parsed.config_dir = Some(PathBuf::from(value));
                } else {
                    return Err(AppError::Usage(format!("unknown argument `{other}`")));
                }
            }
        }
    }

    Ok(parsed)
}

fn build_env_filter(directive: Option<&str>) -> EnvFilter {
    directive
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// The TUI owns stdout, so logs go to `<config dir>/logs/nlsql.log`. The
/// returned guard flushes the writer when dropped.
fn init_logging(config_dir: &Path) -> Result<WorkerGuard, AppError> {
    let logs_dir = config_dir.join("logs");
    fs::create_dir_all(&logs_dir).map_err(|source| AppError::Logging {
        path: logs_dir.clone(),
        source,
    })?;

    let file_appender = tracing_appender::rolling::never(&logs_dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    let filter = build_env_filter(env::var(LOG_ENV).ok().as_deref());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(AppError::Subscriber)?;

    Ok(guard)
}

#[derive(Debug)]
struct Startup {
    config: ClientConfig,
    store: FileKeyValueStore,
    settings: UserSettings,
    history: Vec<HistoryEntry>,
}

fn resolve_config_dir(args: &CliArgs) -> Result<PathBuf, AppError> {
    match &args.config_dir {
        Some(dir) => Ok(dir.clone()),
        None => Ok(default_config_dir()?),
    }
}

/// Loads config, settings and history. A config file is written with the
/// defaults on first start; unreadable settings or history start empty.
fn load_startup(
    args: &CliArgs,
    config_dir: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Startup, AppError> {
    let config_path = config_dir.join(CONFIG_FILE_NAME);
    let loaded = ClientConfig::load_from_path(&config_path)?;
    if !config_path.exists() {
        loaded.persist(&config_path)?;
        info!(path = %config_path.display(), "wrote default config");
    }

    let mut config = loaded.with_env_overrides(lookup);
    if let Some(endpoint) = &args.endpoint {
        config.endpoint.clone_from(endpoint);
    }

    let store = FileKeyValueStore::new(config_dir);
    let settings = UserSettings::load(&store).unwrap_or_else(|error| {
        warn!(error = %error, "ignoring unreadable settings");
        UserSettings::default()
    });
    let history = load_history(&store).unwrap_or_else(|error| {
        warn!(error = %error, "ignoring unreadable chat history");
        Vec::new()
    });

    Ok(Startup {
        config,
        store,
        settings,
        history,
    })
}

fn run_app<C, F>(startup: Startup, connector: C, run_tui: F) -> Result<(), AppError>
where
    C: SocketConnector,
    F: FnOnce(ChatTui<ConnectionHandle, FileKeyValueStore>) -> Result<(), TuiError>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .map_err(AppError::Runtime)?;

    let runtime_guard = runtime.enter();
    let connection = ConnectionManager::spawn(
        connector,
        startup.config.endpoint.clone(),
        startup.config.reconnect_policy(),
    );
    drop(runtime_guard);
    connection.handle.connect();

    let mut session = ChatSession::new(startup.settings.clone(), startup.config.chart_options());
    session.restore_history(&startup.history);
    let settings = SettingsDialog::new(
        startup.settings,
        startup.config.database_options.clone(),
        startup.config.llm_options.clone(),
    );

    let handle = connection.handle.clone();
    let tui_result = run_tui(ChatTui {
        connection: connection.handle,
        events: connection.events,
        store: startup.store,
        session,
        settings,
    });

    handle.shutdown();
    match runtime.block_on(async { tokio::time::timeout(SHUTDOWN_GRACE, connection.task).await }) {
        Ok(Ok(())) => info!("connection task stopped"),
        Ok(Err(error)) => warn!(error = %error, "connection task failed"),
        Err(_) => warn!("connection task did not stop in time"),
    }

    tui_result?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args_from(env::args().skip(1))?;
    if args.help {
        println!("{USAGE}");
        return Ok(());
    }

    let config_dir = resolve_config_dir(&args)?;
    let _log_guard = init_logging(&config_dir)?;
    let startup = load_startup(&args, &config_dir, |key| env::var(key).ok())?;
    info!(
        endpoint = %startup.config.endpoint,
        config_dir = %config_dir.display(),
        "starting nlsql"
    );

    run_app(startup, WebSocketConnector::default(), nlsql_tui::run)?;
    Ok(())
}
