//! Clap derive structures for the `livefeed` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// livefeed -- follow live entity event streams from the terminal
#[derive(Debug, Parser)]
#[command(
    name = "livefeed",
    version,
    about = "Follow authenticated live event streams, one per entity",
    long_about = "Subscribes to the server-sent event stream of one or more entities,\n\
        reconnecting with backoff whenever a stream drops, and prints every\n\
        event as it arrives.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Server profile to use
    #[arg(long, short = 'p', env = "LIVEFEED_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Server base URL (overrides profile)
    #[arg(long, short = 's', env = "LIVEFEED_SERVER", global = true)]
    pub server: Option<String>,

    /// Bearer token (overrides profile)
    #[arg(long, env = "LIVEFEED_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "LIVEFEED_INSECURE", global = true)]
    pub insecure: bool,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stream events for one or more entities until interrupted
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Inspect configuration
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Entity keys to subscribe to
    #[arg(required = true, num_args = 1..)]
    pub keys: Vec<String>,

    /// Event types to print (repeatable; default: message)
    #[arg(long = "event", short = 'e', value_name = "NAME")]
    pub events: Vec<String>,

    /// Print one JSON object per event instead of text
    #[arg(long)]
    pub json: bool,

    /// Give up on a stream after this many consecutive failed reconnects
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Display the loaded configuration (tokens redacted)
    Show,

    /// List configured profiles
    Profiles,
}
