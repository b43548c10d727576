use std::path::PathBuf;

use clap::{Parser, Subcommand};
use telesync::cli::commands;
use telesync::db::models::Feature;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "telesync")]
#[command(author, version, about = "Periodic telemetry uploader with a local day ledger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Profile to use
    #[arg(short, long, global = true, env = "TELESYNC_PROFILE")]
    profile: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "TELESYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Authentication commands
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Enable, disable and inspect features
    Feature {
        #[command(subcommand)]
        command: FeatureCommands,
    },
    /// Inspect the local ledger
    Ledger {
        #[command(subcommand)]
        command: LedgerCommands,
    },
    /// Run one sync cycle now
    Tick {
        /// Feature to sample (steps, location)
        feature: Feature,
        /// Treat the app as being in the foreground
        #[arg(long)]
        foreground: bool,
    },
    /// Run the scheduler until interrupted.
    ///
    /// SIGUSR1 marks the app as foreground (draining pending features),
    /// SIGUSR2 as background.
    Run {
        /// Start in the foreground and drain pending features
        #[arg(long)]
        foreground: bool,
        /// Treat startup as boot-completed and re-arm after the boot delay
        #[arg(long)]
        boot: bool,
    },
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Store a token for the remote store
    Login {
        /// User id owning the remote data
        #[arg(short, long, env = "TELESYNC_UID")]
        uid: String,
        /// Bearer token
        #[arg(short, long, env = "TELESYNC_TOKEN")]
        token: String,
        /// Seconds until the token expires
        #[arg(long)]
        expires_in: Option<i64>,
    },
    /// Logout and clear credentials
    Logout,
    /// Show authentication status
    Status,
}

#[derive(Subcommand)]
enum FeatureCommands {
    /// Enable periodic sync for a feature
    Enable {
        feature: Feature,
        /// Interval between cycles (e.g. 15m, 1h)
        #[arg(short, long)]
        interval: Option<String>,
    },
    /// Disable periodic sync for a feature
    Disable { feature: Feature },
    /// Show sync state
    Status {
        /// Also fetch the settings stored remotely
        #[arg(long)]
        remote: bool,
    },
}

#[derive(Subcommand)]
enum LedgerCommands {
    /// Show recent entries
    Show {
        feature: Feature,
        /// Number of days to show
        #[arg(long, default_value = "7")]
        days: u32,
    },
    /// Delete entries
    Clear {
        feature: Feature,
        /// Only delete days before this date (YYYY-MM-DD)
        #[arg(long)]
        before: Option<String>,
    },
}

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "telesync=warn",
            1 => "telesync=debug",
            _ => "telesync=trace",
        })
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> telesync::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let (profile, config) = (cli.profile, cli.config);

    let result = match cli.command {
        Commands::Auth { command } => match command {
            AuthCommands::Login {
                uid,
                token,
                expires_in,
            } => commands::login(uid, token, expires_in, profile, config).await,
            AuthCommands::Logout => commands::logout(profile, config).await,
            AuthCommands::Status => commands::status(profile, config).await,
        },
        Commands::Feature { command } => match command {
            FeatureCommands::Enable { feature, interval } => {
                commands::enable_feature(feature, interval, profile, config).await
            }
            FeatureCommands::Disable { feature } => {
                commands::disable_feature(feature, profile, config).await
            }
            FeatureCommands::Status { remote } => {
                commands::feature_status(remote, profile, config).await
            }
        },
        Commands::Ledger { command } => match command {
            LedgerCommands::Show { feature, days } => {
                commands::show_ledger(feature, days, profile, config).await
            }
            LedgerCommands::Clear { feature, before } => {
                commands::clear_ledger(feature, before, profile, config).await
            }
        },
        Commands::Tick {
            feature,
            foreground,
        } => commands::tick(feature, foreground, profile, config).await,
        Commands::Run { foreground, boot } => {
            commands::run(foreground, boot, profile, config).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", telesync::error::format_user_error(&e));
        std::process::exit(1);
    }

    Ok(())
}
