use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use chanbot::application::errors::{BotError, CommandError};
use chanbot::application::messaging::{parse_command_arguments, MessageDispatcher, NotificationHandler};
use chanbot::application::services::{builtins, CommandService};
use chanbot::domain::entities::{lock_command, CommandPatch, TokenLedger, User};
use chanbot::domain::traits::EconomyStore;
use chanbot::infrastructure::adapters::console::ConsoleInput;
use chanbot::infrastructure::adapters::{ChannelSink, ConsoleAdapter};
use chanbot::infrastructure::config::{Config, EconomyBackend};
use chanbot::infrastructure::database::Database;
use chanbot::infrastructure::storage::MemoryEconomyStore;

#[derive(Parser)]
#[command(name = "chanbot")]
#[command(about = "Chat command engine for live stream bots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot on the console
    Run,
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
    /// Add a command, e.g. `add hello --cd 10 Hello $(source)!`
    Add {
        /// Aliases separated by `|`
        alias: String,
        /// Options and response text
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// List documented commands
    List,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run => block_on(run_bot(load_config(&cli.config))),
        Commands::Version => {
            println!("chanbot v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::InitConfig => init_config(),
        Commands::Add { alias, args } => block_on(add_command(load_config(&cli.config), alias, args)),
        Commands::List => block_on(list_commands(load_config(&cli.config))),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn block_on<F>(future: F) -> Result<(), BotError>
where
    F: std::future::Future<Output = Result<(), BotError>>,
{
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| BotError::Internal(format!("Failed to start runtime: {}", e)))?;
    rt.block_on(future)
}

fn load_config(config_path: &str) -> Config {
    if Path::new(config_path).exists() {
        Config::load(config_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config: {}, using defaults", e);
            Config::load_env()
        })
    } else {
        Config::load_env()
    }
}

/// Open the database and load every command tier
async fn open_service(config: &Config) -> Result<(Arc<Database>, Arc<CommandService>), BotError> {
    let db = Arc::new(Database::new(&config.database.path)?);
    tracing::info!("Database initialized at {}", config.database.path.display());

    let service = Arc::new(CommandService::new(
        db.clone(),
        builtins::function_table(),
        config.bot.prefix.clone(),
    ));
    service.load(builtins::internal_commands()).await?;
    Ok((db, service))
}

async fn run_bot(config: Config) -> Result<(), BotError> {
    tracing::info!("Starting {} in #{}", config.bot.name, config.bot.streamer);
    let (db, service) = open_service(&config).await?;

    let economy: Arc<dyn EconomyStore> = match config.economy.backend {
        EconomyBackend::Memory => Arc::new(MemoryEconomyStore::new()),
        EconomyBackend::Sqlite => db.clone(),
    };
    let mut ledger = TokenLedger::new(economy, config.bot.streamer.clone());
    ledger.set_session(config.economy.session.clone());

    let (sink, outbound) = ChannelSink::channel();
    let mut dispatcher = MessageDispatcher::new(service.clone(), Arc::new(sink), ledger);
    for seed in &config.users {
        dispatcher = dispatcher.with_user(
            User::new(&seed.username)
                .with_level(seed.level)
                .with_points(seed.points)
                .with_subscriber(seed.subscriber)
                .with_moderator(seed.moderator),
        );
    }

    let (notify_tx, notify_rx) = mpsc::channel(64);
    let notifications = NotificationHandler::new(service.clone()).spawn(notify_rx);

    let (input_tx, mut input_rx) = mpsc::channel(64);
    tokio::spawn(ConsoleAdapter::new(config.bot.streamer.clone()).read_input(input_tx));
    let printer = tokio::spawn(ConsoleAdapter::print_output(outbound));

    let sweeper = {
        let service = service.clone();
        let period = Duration::from_secs(config.commands.sweep_interval_seconds);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                service.sweep_cooldowns(Utc::now()).await;
            }
        })
    };

    let committer = {
        let service = service.clone();
        let period = Duration::from_secs(config.commands.commit_interval_seconds);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(e) = service.commit().await {
                    tracing::error!("Failed to commit usage statistics: {}", e);
                }
            }
        })
    };

    tracing::info!("Bot started, type `user: {}command` to chat", config.bot.prefix);

    while let Some(input) = input_rx.recv().await {
        match input {
            ConsoleInput::Chat(message) => {
                dispatcher.process(message).await;
            }
            ConsoleInput::Notify(payload) => {
                if notify_tx.send(payload).await.is_err() {
                    tracing::warn!("Notification handler stopped");
                }
            }
        }
    }

    sweeper.abort();
    committer.abort();
    drop(notify_tx);
    drop(dispatcher);
    let _ = notifications.await;
    let _ = printer.await;

    service.commit().await?;
    tracing::info!("Bot stopped");
    Ok(())
}

async fn add_command(config: Config, alias: String, args: Vec<String>) -> Result<(), BotError> {
    let (options, response) = parse_command_arguments(&args.join(" "))
        .ok_or_else(|| CommandError::InvalidArgs("invalid command options".to_string()))?;
    if response.is_empty() {
        return Err(CommandError::InvalidArgs("missing response text".to_string()).into());
    }

    let patch = CommandPatch {
        level: options.level.or(Some(config.commands.default_level)),
        delay_all: options.delay_all.or(Some(config.commands.default_delay_all)),
        delay_user: options.delay_user.or(Some(config.commands.default_delay_user)),
        ..options.into_patch(&response)
    };

    let (_db, service) = open_service(&config).await?;
    let registration = service.register_persisted(&alias, &patch).await?;

    let command = lock_command(&registration.command);
    match registration.conflicting_alias {
        Some(conflict) => println!("Alias {} is already used by !{}", conflict, command.command),
        None => println!("Added !{} (id {})", command.command, command.id.unwrap_or_default()),
    }
    Ok(())
}

async fn list_commands(config: Config) -> Result<(), BotError> {
    let (_db, service) = open_service(&config).await?;
    for doc in service.parse_for_web().await {
        println!("{:<24} level {:<5} {}", doc.alias, doc.level, doc.description);
    }
    println!("{} aliases registered", service.alias_count().await);
    Ok(())
}

fn init_config() -> Result<(), BotError> {
    let yaml = Config::default().to_yaml()?;
    println!("{}", yaml);
    println!("\nSave this to config.yaml and adjust as needed.");
    Ok(())
}
