/*
 * Command-line front end. Wires the core services together from the stored
 * configuration (overridable per invocation) and prints structured outcomes as JSON
 * on stdout; diagnostics go through the logger to stderr and the log file.
 */
use clap::{ArgAction, Parser, Subcommand};
use shortcut_sync::core::app_id;
use shortcut_sync::core::config::{self, APP_NAME};
use shortcut_sync::core::{
    CatalogError, ConfigError, ConfigManagerOperations, CoreCatalog, CoreConfigManager,
    CoreExecutableDiscovery, CoreSettingsStore, DiscoveryOutcome, ExecutableDiscoveryOperations,
    Reconciler, ShortcutFileError, SyncConfig, SyncContext, SyncError, WriteBackScheduler,
    read_shortcuts_file,
};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};
use std::fs::OpenOptions;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

const LOG_FILENAME: &str = "shortcut_sync.log";

/// Keeps an external launcher's shortcuts file and a game catalog in sync
#[derive(Parser)]
#[command(name = "shortcut-sync")]
#[command(version)]
struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory holding config.json (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Shortcuts file to read and write
    #[arg(long, global = true)]
    shortcuts: Option<PathBuf>,

    /// Catalog JSON file
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Sync state JSON file
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the records of a shortcuts file as JSON
    Decode { file: PathBuf },

    /// Print the app id, composite id and launch URL for an executable and name
    AppId {
        /// Executable exactly as stored in the shortcuts file (usually quoted)
        exe: String,
        name: String,
    },

    /// Look for the main executable of a game in its install directory
    Discover { dir: PathBuf, name: String },

    /// Add catalog records for shortcuts the catalog does not have yet
    Import,

    /// Write catalog records to the shortcuts file
    Export {
        /// Catalog ids to export; all records owned by this integration when omitted
        #[arg(long = "id")]
        ids: Vec<String>,
    },

    /// Read one catalog-edit notification per stdin line and export after a quiet period
    Watch,
}

#[derive(Debug)]
enum CliError {
    Config(ConfigError),
    Catalog(CatalogError),
    Shortcuts(ShortcutFileError),
    Sync(SyncError),
    Io(io::Error),
    Json(serde_json::Error),
    MissingShortcutsPath,
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        CliError::Config(err)
    }
}

impl From<CatalogError> for CliError {
    fn from(err: CatalogError) -> Self {
        CliError::Catalog(err)
    }
}

impl From<ShortcutFileError> for CliError {
    fn from(err: ShortcutFileError) -> Self {
        CliError::Shortcuts(err)
    }
}

impl From<SyncError> for CliError {
    fn from(err: SyncError) -> Self {
        CliError::Sync(err)
    }
}

impl From<io::Error> for CliError {
    fn from(err: io::Error) -> Self {
        CliError::Io(err)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Json(err)
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Config(e) => write!(f, "{e}"),
            CliError::Catalog(e) => write!(f, "{e}"),
            CliError::Shortcuts(e) => write!(f, "{e}"),
            CliError::Sync(e) => write!(f, "{e}"),
            CliError::Io(e) => write!(f, "I/O error: {e}"),
            CliError::Json(e) => write!(f, "Output serialization error: {e}"),
            CliError::MissingShortcutsPath => write!(
                f,
                "No shortcuts file configured; pass --shortcuts or set shortcuts_path in config.json"
            ),
        }
    }
}

impl std::error::Error for CliError {}

type Result<T> = std::result::Result<T, CliError>;

fn init_logging(verbose: u8, log_dir: Option<&Path>) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let log_config = ConfigBuilder::new().build();
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        log_config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    if let Some(dir) = log_dir {
        let log_path = dir.join(LOG_FILENAME);
        match OpenOptions::new().create(true).append(true).open(&log_path) {
            Ok(file) => loggers.push(WriteLogger::new(level.max(LevelFilter::Debug), log_config, file)),
            Err(e) => eprintln!("Could not open log file {log_path:?}: {e}"),
        }
    }
    if let Err(e) = CombinedLogger::init(loggers) {
        eprintln!("Logger initialization failed: {e}");
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

struct Session {
    config: SyncConfig,
    config_dir: PathBuf,
}

impl Session {
    fn load(cli: &Cli, manager: &dyn ConfigManagerOperations) -> Result<Self> {
        let config_dir = manager.config_dir(APP_NAME)?;
        let mut config = manager.load_config(APP_NAME)?;
        if let Some(path) = &cli.shortcuts {
            config.shortcuts_path = Some(path.clone());
        }
        if let Some(path) = &cli.catalog {
            config.catalog_path = Some(path.clone());
        }
        if let Some(path) = &cli.state {
            config.state_path = Some(path.clone());
        }
        Ok(Session { config, config_dir })
    }

    fn reconciler(&self) -> Result<Reconciler> {
        let shortcuts_path = self
            .config
            .shortcuts_path
            .clone()
            .ok_or(CliError::MissingShortcutsPath)?;
        let catalog = CoreCatalog::open(&self.config.catalog_path_in(&self.config_dir))?;
        let settings = CoreSettingsStore::new(&self.config.state_path_in(&self.config_dir));
        log::debug!(
            "Cli: Shortcuts {shortcuts_path:?}, state {:?}.",
            settings.path()
        );
        Ok(Reconciler::new(SyncContext {
            catalog: Arc::new(catalog),
            settings: Arc::new(settings),
            discovery: Arc::new(CoreExecutableDiscovery::with_depth(
                self.config.discovery_depth,
            )),
            manual_selection: None,
            shortcuts_path,
            source_tag: self.config.source_tag.clone(),
            launch_scheme: self.config.launch_scheme.clone(),
        }))
    }
}

#[derive(serde::Serialize)]
struct AppIdReport {
    app_id: u32,
    composite_id: u64,
    launch_url: String,
}

#[derive(serde::Serialize)]
struct DiscoveryReport {
    outcome: &'static str,
    path: Option<PathBuf>,
    candidates: Vec<(PathBuf, i32)>,
}

fn discovery_report(outcome: DiscoveryOutcome) -> DiscoveryReport {
    match outcome {
        DiscoveryOutcome::Found(path) => DiscoveryReport {
            outcome: "found",
            path: Some(path),
            candidates: Vec::new(),
        },
        DiscoveryOutcome::NotFound => DiscoveryReport {
            outcome: "not_found",
            path: None,
            candidates: Vec::new(),
        },
        DiscoveryOutcome::Ambiguous(candidates) => DiscoveryReport {
            outcome: "ambiguous",
            path: None,
            candidates: candidates.into_iter().map(|c| (c.path, c.score)).collect(),
        },
    }
}

fn watch(reconciler: Reconciler, config: &SyncConfig) -> Result<()> {
    let scheduler =
        WriteBackScheduler::for_reconciler(Arc::new(reconciler), config.debounce_delay())?;
    log::info!(
        "Cli: Watching stdin; each line is one catalog edit (delay {:?}).",
        scheduler.delay()
    );
    for line in io::stdin().lock().lines() {
        let line = line?;
        log::trace!("Cli: Notification '{}'.", line.trim());
        scheduler.notify();
    }
    log::info!("Cli: End of input; stopping without a final flush.");
    scheduler.shutdown();
    Ok(())
}

fn run(cli: &Cli, session: &Session) -> Result<()> {
    match &cli.command {
        Commands::Decode { file } => print_json(&read_shortcuts_file(file)?),
        Commands::AppId { exe, name } => {
            let id = app_id::derive_app_id(exe, name);
            print_json(&AppIdReport {
                app_id: id,
                composite_id: app_id::to_composite_id(id),
                launch_url: app_id::launch_url(&session.config.launch_scheme, id),
            })
        }
        Commands::Discover { dir, name } => {
            let discovery = CoreExecutableDiscovery::with_depth(session.config.discovery_depth);
            print_json(&discovery_report(discovery.discover(dir, name)))
        }
        Commands::Import => print_json(&session.reconciler()?.run_import()?),
        Commands::Export { ids } => {
            let reconciler = session.reconciler()?;
            let outcome = if ids.is_empty() {
                reconciler.export_integration_records()?
            } else {
                reconciler.run_export(ids)?
            };
            print_json(&outcome)
        }
        Commands::Watch => watch(session.reconciler()?, &session.config),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let manager = match &cli.config_dir {
        Some(dir) => CoreConfigManager::with_config_dir(dir),
        None => CoreConfigManager::new(),
    };
    init_logging(cli.verbose, manager.config_dir(config::APP_NAME).ok().as_deref());

    let result = Session::load(&cli, &manager).and_then(|session| run(&cli, &session));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Cli: {e}");
            ExitCode::FAILURE
        }
    }
}
