//! Task Planner
//!
//! Personal task planner served as a small web app: projects, tags, nested
//! subtasks, recurring tasks, reminders and task dependencies on SQLite.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use task_planner::auth;
use task_planner::cli::{Cli, Command, CreateUserArgs};
use task_planner::config::Config;
use task_planner::db::{Database, now_ms};
use task_planner::notify::{self, EmailSender, LogEmailSender};
use task_planner::web::{self, AppServer};
use tokio::sync::oneshot;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    match cli.log.as_str() {
        "0" | "off" => {}
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)
                .with_context(|| format!("opening log file {}", filename))?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

/// Config file and environment first, then command line flags.
fn load_config(cli: &Cli) -> Result<Config> {
    let explicit = cli.config.as_ref().map(PathBuf::from);
    let mut config = Config::load_or_default(explicit.as_deref())?;
    if let Some(db) = &cli.database {
        config.server.db_path = PathBuf::from(db);
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok(config)
}

fn open_database(config: &Config) -> Result<Arc<Database>> {
    config.ensure_db_dir()?;
    let db = Database::open(&config.server.db_path)
        .with_context(|| format!("opening database {}", config.server.db_path.display()))?;
    Ok(Arc::new(db))
}

async fn serve(config: Config, db: Arc<Database>) -> Result<()> {
    if config.uses_dev_secret() {
        warn!("Using the built-in session secret; set PLANNER_JWT_SECRET before exposing the server");
    }
    match db.purge_expired_sessions() {
        Ok(n) if n > 0 => info!(removed = n, "Purged expired sessions and reset tokens"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Failed to purge expired sessions"),
    }

    let config = Arc::new(config);
    let mailer: Arc<dyn EmailSender> = Arc::new(LogEmailSender);

    let poller = if config.reminders.enabled {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = notify::spawn_reminder_poller(
            Arc::clone(&db),
            Arc::clone(&mailer),
            config.reminders.clone(),
            stop_rx,
        );
        Some((stop_tx, handle))
    } else {
        info!("Reminder poller disabled");
        None
    };

    let state = AppServer::new(Arc::clone(&db), Arc::clone(&config), mailer);
    let (server_shutdown, addr) = web::start_server(state).await?;
    info!("Open http://{} in a browser", addr);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    let _ = server_shutdown.send(());
    if let Some((stop_tx, handle)) = poller {
        let _ = stop_tx.send(());
        let _ = handle.await;
    }
    Ok(())
}

async fn remind_once(config: &Config, db: &Database) -> Result<()> {
    let summary = notify::dispatch_due_reminders(
        db,
        &LogEmailSender,
        now_ms(),
        config.reminders.batch_size,
    )
    .await?;
    println!(
        "Reminders: {} sent, {} failed, {} skipped",
        summary.sent, summary.failed, summary.skipped
    );
    Ok(())
}

fn create_user(config: &Config, db: &Database, args: CreateUserArgs) -> Result<()> {
    let password = match args.password {
        Some(p) => p,
        None => std::env::var("PLANNER_NEW_PASSWORD")
            .context("pass --password or set PLANNER_NEW_PASSWORD")?,
    };
    let user = auth::signup(db, &config.auth, &args.username, args.email.as_deref(), &password)?;
    println!("Created user {} ({})", user.username, user.id);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let config = load_config(&cli)?;
    let db = open_database(&config)?;
    info!(db = %config.server.db_path.display(), "Database ready");

    match cli.command {
        None | Some(Command::Serve) => serve(config, db).await,
        Some(Command::Remind) => remind_once(&config, &db).await,
        Some(Command::CreateUser(args)) => create_user(&config, &db, args),
    }
}
