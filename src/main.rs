mod aggregator;
mod command;
mod condition;
mod config;
mod credentials;
mod error;
mod expr;
mod model;
mod notifier;
mod scheduler;
mod storage;
mod store_keeper;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use error_stack::{Report, ResultExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

use command::CommandSurface;
use condition::ConditionProcessor;
use config::AppConfig;
use credentials::Credentials;
use error::AppError;
use notifier::Notifier;
use notifier::terminal::TerminalNotifier;
use scheduler::Scheduler;
use storage::Storage;
use storage::sqlite::SqliteStorage;
use store_keeper::StoreKeeper;

const NOTIFICATOR_JOB: &str = "notificator";

#[derive(Parser)]
#[command(name = "athena-notifier", about = "Market-data condition notifier")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler loop until interrupted (default)
    Serve,
    /// Add a notification rule for a chat, as a chat transport would relay it
    Add {
        chat_id: i64,
        /// The rule expression, e.g. "#YNDX.mean[C]>2000"
        expr: String,
    },
    /// Remove a notification by id
    Remove { id: String },
    /// List a chat's active notifications
    List {
        chat_id: i64,
    },
    /// Show help text, optionally for one command
    Help {
        cmd: Option<String>,
    },
}

struct App {
    config: AppConfig,
    condition_processor: Arc<ConditionProcessor>,
    command_surface: CommandSurface,
    scheduler: Scheduler,
}

impl App {
    async fn bootstrap(config: AppConfig) -> Result<Self, Report<AppError>> {
        let credentials = Credentials::load(&config.general.res_dir()).change_context(AppError::Config)?;

        let storage: Arc<dyn Storage> = Arc::new(
            SqliteStorage::open(&config.general.db_path())
                .await
                .change_context(AppError::Storage)?,
        );

        let store_keeper = Arc::new(StoreKeeper::with_hints(
            Arc::clone(&storage),
            credentials.moex,
            store_keeper::MarketHints {
                market: config.moex.market.clone(),
                engine: config.moex.engine.clone(),
            },
        ));
        let notifier: Arc<dyn Notifier> = Arc::new(TerminalNotifier);

        let condition_processor = Arc::new(
            ConditionProcessor::bootstrap(Arc::clone(&storage), store_keeper, notifier)
                .await
                .change_context(AppError::Storage)?,
        );

        let command_surface = CommandSurface::new(Arc::clone(&condition_processor));

        Ok(Self {
            config,
            condition_processor,
            command_surface,
            scheduler: Scheduler::new(),
        })
    }

    /// Arm the recurring tick job, cancelling any prior job under the same
    /// name first.
    fn start_scheduler(&self) {
        let processor = Arc::clone(&self.condition_processor);
        let period = Duration::from_secs(self.config.general.notification_interval_secs);
        self.scheduler.schedule(NOTIFICATOR_JOB, period, move || {
            let processor = Arc::clone(&processor);
            async move { processor.tick().await }
        });
    }
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();
    let config = config::load(Path::new(&cli.config)).change_context(AppError::Config)?;

    init_tracing(&config);

    let app = App::bootstrap(config).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_serve(app).await,
        Command::Add { chat_id, expr } => {
            println!("{}", app.command_surface.add(chat_id, &expr).await);
            Ok(())
        }
        Command::Remove { id } => {
            println!("{}", app.command_surface.remove(&id).await);
            Ok(())
        }
        Command::List { chat_id } => {
            println!("{}", app.command_surface.list(chat_id).await);
            Ok(())
        }
        Command::Help { cmd } => {
            println!("{}", app.command_surface.help(cmd.as_deref()).await);
            Ok(())
        }
    }
}

async fn run_serve(app: App) -> Result<(), Report<AppError>> {
    app.start_scheduler();
    info!(
        interval_secs = app.config.general.notification_interval_secs,
        "notificator scheduled, serving until interrupted"
    );

    tokio::signal::ctrl_c().await.change_context(AppError::Runtime)?;
    info!("ctrl+c received, shutting down");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
