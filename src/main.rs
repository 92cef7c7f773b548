use anyhow::{Context, Result};
use clap::Parser;
use session_tracker::cli::{AppConfig, Args, Commands, ConfigDiscovery};
use session_tracker::{
    DefaultTransitions, JsonFileStore, LoginOutcome, ScopeBinder, SessionId, SessionTracker,
    TrackerError, env,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Resource registered in every session scope
#[derive(Debug)]
struct SessionGreeting(String);

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    info!("Starting session tracker");

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        env::VERBOSE_LOG_FILTER
    } else {
        env::DEFAULT_LOG_FILTER
    };
    let filter = EnvFilter::try_from_env(env::LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> Result<()> {
    let mut config = ConfigDiscovery::load(args.config.as_deref())?;
    if let Some(store) = &args.store {
        config.storage_path = Some(store.clone());
    }
    if args.verbose {
        config.tracker.verbose = true;
    }

    if !args.command.needs_tracker() {
        return run_config_command(&config, &args.command);
    }

    let (tracker, binder) = build_tracker(&config);

    // Store I/O stays off the async runtime, like every mutating call below
    let records = in_background(&tracker, |tracker| tracker.initialize())
        .await
        .context("Failed to initialize session tracker")?;
    info!("Loaded {} tracked sessions", records.len());

    let message = run_command(&tracker, &binder, &args.command).await?;
    println!("{}", message);
    Ok(())
}

fn run_config_command(config: &AppConfig, command: &Commands) -> Result<()> {
    match command {
        Commands::InitConfig => {
            let path = ConfigDiscovery::create_default_user_config()?;
            println!("Configuration file: {}", path.display());
        }
        _ => ConfigDiscovery::show_discovery_info(config),
    }
    Ok(())
}

fn build_tracker(config: &AppConfig) -> (Arc<SessionTracker>, Arc<ScopeBinder>) {
    let storage_path = config.resolve_storage_path();
    info!("Using session store {}", storage_path.display());

    let binder = Arc::new(ScopeBinder::with_initializer(|scope| {
        scope.insert(SessionGreeting(format!("Welcome back, {}", scope.session_id())));
    }));
    let tracker = SessionTracker::new(
        JsonFileStore::new(storage_path),
        DefaultTransitions,
        config.tracker.clone(),
    )
    .with_listener(binder.clone());

    (Arc::new(tracker), binder)
}

async fn run_command(
    tracker: &Arc<SessionTracker>,
    binder: &ScopeBinder,
    command: &Commands,
) -> Result<String> {
    match command {
        Commands::Login { session_id } => {
            let session_id = SessionId::new(session_id.as_str())?;
            let id = session_id.clone();
            let outcome = in_background(tracker, move |tracker| tracker.login(&id)).await?;

            let how = match outcome {
                LoginOutcome::Tracked => "new session",
                LoginOutcome::Reactivated => "returning session",
            };
            let greeting = binder
                .get_scope(&session_id)
                .and_then(|scope| scope.get::<SessionGreeting>())
                .map(|greeting| greeting.0.clone())
                .unwrap_or_default();
            Ok(format!("Logged in '{}' ({}). {}", session_id, how, greeting))
        }
        Commands::Logout { session_id } | Commands::Forget { session_id } => {
            let session_id = SessionId::new(session_id.as_str())?;
            let event = command
                .event()
                .context("Command does not map to a session event")?;
            let id = session_id.clone();
            let state =
                in_background(tracker, move |tracker| tracker.consume_event(&id, event)).await?;
            Ok(format!("Session '{}' is now {}", session_id, state))
        }
        Commands::Untrack { session_id } => {
            let session_id = SessionId::new(session_id.as_str())?;
            let id = session_id.clone();
            let record = in_background(tracker, move |tracker| tracker.untrack_session(&id)).await?;
            Ok(format!(
                "Stopped tracking '{}' (was {})",
                record.session_id, record.state
            ))
        }
        Commands::List => {
            let records = tracker.session_records();
            if records.is_empty() {
                return Ok("No tracked sessions".to_string());
            }
            let lines: Vec<String> = records
                .iter()
                .map(|record| {
                    let scope = binder
                        .get_scope(&record.session_id)
                        .map(|scope| format!("scope {}", scope.id()))
                        .unwrap_or_else(|| "no scope".to_string());
                    format!("  {:<24} {:<10} {}", record.session_id, record.state, scope)
                })
                .collect();
            Ok(format!("Tracked sessions:\n{}", lines.join("\n")))
        }
        Commands::Reset => {
            let removed =
                in_background(tracker, |tracker| tracker.delete_all_session_records()).await?;
            Ok(format!("Deleted {} session records", removed.len()))
        }
        Commands::ShowConfig | Commands::InitConfig => Ok(String::new()),
    }
}

/// Run a tracker operation on the blocking pool and report its result back
/// on the calling task
async fn in_background<T, F>(tracker: &Arc<SessionTracker>, op: F) -> Result<T>
where
    F: FnOnce(&SessionTracker) -> Result<T, TrackerError> + Send + 'static,
    T: Send + 'static,
{
    let tracker = Arc::clone(tracker);
    let result = tokio::task::spawn_blocking(move || op(&tracker))
        .await
        .context("Session tracker task panicked")?;
    Ok(result?)
}
