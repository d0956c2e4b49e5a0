//! CLI command definitions for task-planner
//!
//! The binary serves the web app by default; the other subcommands are
//! one-shot maintenance jobs against the same database.

use clap::{Args, Parser, Subcommand};

/// Personal task planner: web app, reminder dispatch and account tools
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// HTTP port (overrides config)
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the web server and the reminder poller (default if no subcommand given)
    Serve,

    /// Send every due email reminder once, then exit
    Remind,

    /// Create an account from the command line
    CreateUser(CreateUserArgs),
}

#[derive(Args, Debug)]
pub struct CreateUserArgs {
    /// Login name (3-32 characters: letters, digits, '_' and '-')
    pub username: String,

    /// Password; read from PLANNER_NEW_PASSWORD when omitted
    #[arg(long)]
    pub password: Option<String>,

    /// Email address for reminders and password resets
    #[arg(long)]
    pub email: Option<String>,
}
