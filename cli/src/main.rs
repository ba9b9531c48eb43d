mod commands;

use clap::{Args, Parser, Subcommand};
use shared_types::RetentionLimit;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, Level};

/// Backup, restore and migration jobs for a multi-tenant bench
#[derive(Parser, Debug)]
#[command(name = env!("CARGO_BIN_NAME"), version, rename_all = "kebab-case")]
struct Cli {
    #[command(flatten)]
    bench: BenchArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct BenchArgs {
    /// Directory holding `common_site_config.json` and one folder per site
    #[arg(long, env = "SITES_DIR", default_value = ".", global = true)]
    pub sites_dir: PathBuf,

    /// Staging directory restores read from and remote pulls write to
    #[arg(long, env = "BACKUP_DIR", global = true)]
    pub backup_dir: Option<PathBuf>,

    /// Directory holding the app checkouts listed in `apps.txt`
    #[arg(long, env = "APPS_DIR", default_value = "../apps", global = true)]
    pub apps_dir: PathBuf,
}

impl BenchArgs {
    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir.clone().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_default()
                .join("backups")
        })
    }
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Command {
    /// Upload a site's newest local backup and prune old remote ones.
    PushBackup(PushArgs),
    /// Restore one site, or every staged backup when no site is given.
    RestoreBackup {
        #[arg(long)]
        site: Option<String>,
    },
    /// Migrate every site when an app's version moved forward.
    AutoMigrate {
        #[arg(long, env = "ROLLING_RELEASE_BRANCH", default_value = "develop")]
        rolling_release_branch: String,
        /// Colon-separated site list; defaults to every installed site
        #[arg(long, env = "SITES")]
        sites: Option<String>,
    },
    /// Migrate sites unconditionally.
    Migrate {
        /// Bracket the run with maintenance mode
        #[arg(
            long,
            env = "MAINTENANCE_MODE",
            value_parser = clap::builder::BoolishValueParser::new()
        )]
        maintenance_mode: bool,
        #[arg(long, env = "SITES")]
        sites: Option<String>,
    },
    /// Wait for the database and redis services to accept connections.
    CheckConnection {
        #[arg(long, default_value_t = 10)]
        attempts: u32,
        /// Seconds between attempts
        #[arg(long, default_value_t = 3)]
        delay: u64,
        /// Seconds allowed per connection attempt
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Report which backing services are reachable right now.
    Doctor,
}

/// Flags override the matching environment variable.
#[derive(Args, Debug)]
pub struct PushArgs {
    #[arg(long)]
    pub site: String,
    #[arg(long)]
    pub bucket: Option<String>,
    #[arg(long)]
    pub region_name: Option<String>,
    #[arg(long)]
    pub endpoint_url: Option<String>,
    #[arg(long)]
    pub aws_access_key_id: Option<String>,
    #[arg(long)]
    pub aws_secret_access_key: Option<String>,
    /// Key prefix inside the bucket
    #[arg(long)]
    pub bucket_directory: Option<String>,
    /// Number of remote backup sets to keep per site
    #[arg(long, env = "BACKUP_LIMIT", default_value = "3")]
    pub backup_limit: RetentionLimit,
    /// Remove the local files once uploaded
    #[arg(long)]
    pub delete_local: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let bench = cli.bench;

    let outcome = match cli.command {
        Command::PushBackup(args) => commands::push_backup(&bench, args).await,
        Command::RestoreBackup { site } => commands::restore_backup(&bench, site.as_deref()).await,
        Command::AutoMigrate {
            rolling_release_branch,
            sites,
        } => commands::auto_migrate(&bench, &rolling_release_branch, sites.as_deref()).await,
        Command::Migrate {
            maintenance_mode,
            sites,
        } => commands::migrate(&bench, maintenance_mode, sites.as_deref()).await,
        Command::CheckConnection {
            attempts,
            delay,
            timeout,
        } => commands::check_connection(&bench, attempts, delay, timeout).await,
        Command::Doctor => commands::doctor(&bench).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
