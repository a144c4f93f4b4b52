use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

use cogbot::application::errors::BotError;
use cogbot::application::messaging::{LoggingMiddleware, MessageDispatcher, OwnerOnlyMiddleware};
use cogbot::application::services::management::MANAGEMENT_COMMANDS;
use cogbot::application::services::ManagementService;
use cogbot::domain::entities::User;
use cogbot::domain::traits::{Bot, ReportSink};
use cogbot::infrastructure::adapters::{ConsoleAdapter, ConsoleCommandTree};
use cogbot::infrastructure::cogs::CogCatalog;
use cogbot::infrastructure::config::Config;
use cogbot::infrastructure::logging;
use cogbot::infrastructure::reports::{FileReportSink, LogReportSink};
use cogbot::plugins::{CogDefinition, CogEvent, CogHost, CogLoader, CogManager};

#[derive(Parser)]
#[command(name = "cogbot")]
#[command(about = "A chat bot with hot-reloadable cogs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot
    Run,
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run => run_bot(&cli.config),
        Commands::Version => {
            println!("cogbot v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::InitConfig => init_config(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_bot(config_path: &Path) -> Result<(), BotError> {
    let found = config_path.exists();
    let config = if found { Config::load(config_path)? } else { Config::default() };

    if let Some(path) = logging::init(&config.logging)? {
        tracing::info!(path = %path.display(), "Writing run log");
    }
    if !found {
        tracing::warn!(path = %config_path.display(), "Config file not found, using defaults");
    }

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| BotError::Internal(format!("cannot start runtime: {}", e)))?;
    rt.block_on(serve(config, config_path.to_path_buf()))
}

async fn serve(config: Config, config_path: PathBuf) -> Result<(), BotError> {
    tracing::info!("Starting cogbot: {}", config.bot.name);

    let host = Arc::new(CogHost::new());
    let loader = CogLoader::new(Arc::clone(&host), config.lifecycle.hook_timeout());
    let reports: Arc<dyn ReportSink> = match &config.logging.output_folder {
        Some(folder) => Arc::new(FileReportSink::new(folder.clone())),
        None => Arc::new(LogReportSink),
    };
    let manager = Arc::new(CogManager::new(loader, config.resolver, reports));
    tokio::spawn(log_events(manager.subscribe()));

    // Script paths in the config are relative to the config file
    let base_dir = config_path.parent().map(Path::to_path_buf).unwrap_or_default();
    let catalog = CogCatalog::new(base_dir);
    for definition in catalog.definitions(&config.cog_entries()?) {
        manager.add_cog(definition).await;
    }

    let management = ManagementService::new(Arc::clone(&manager))
        .with_tree(Arc::new(ConsoleCommandTree::new()))
        .with_config(Arc::new(move || -> Result<Vec<CogDefinition>, String> {
            let config = Config::load(&config_path).map_err(|e| e.to_string())?;
            let entries = config.cog_entries().map_err(|e| e.to_string())?;
            Ok(catalog.definitions(&entries))
        }));

    let dispatcher = MessageDispatcher::new(Arc::clone(&host), config.bot.prefix.clone(), management)?
        .with_middleware(LoggingMiddleware)
        .with_middleware(OwnerOnlyMiddleware::new(
            config.owners.clone(),
            MANAGEMENT_COMMANDS.iter().map(|c| c.to_string()),
        ));

    let summary = manager.load_enabled().await;
    for (id, error) in &summary.failed {
        tracing::error!(cog = %id, error = %error, "Cog failed to load at startup");
    }
    tracing::info!(
        loaded = summary.loaded.len(),
        skipped = summary.skipped.len(),
        failed = summary.failed.len(),
        "Startup complete"
    );
    host.emit("ready", &config.bot.name);

    let bot = ConsoleAdapter::new(config.bot.name.clone());
    let result = run_console_bot(&bot, &dispatcher).await;

    manager.shutdown().await;
    result
}

async fn run_console_bot(bot: &ConsoleAdapter, dispatcher: &MessageDispatcher) -> Result<(), BotError> {
    bot.start().await?;

    let info = bot.bot_info();
    tracing::info!("Bot started: @{}", info.username);

    let sender = User::new("console").with_username("console");
    loop {
        let input = tokio::select! {
            line = bot.read_line("> ") => line,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(input) = input else {
            break;
        };
        if input.is_empty() {
            continue;
        }

        match dispatcher.process_text("console", input, Some(sender.clone())).await {
            Ok(Some(response)) => {
                bot.send_message("console", &response).await?;
            }
            Ok(None) => {}
            Err(e) => {
                bot.send_message("console", &format!("Error: {}", e)).await?;
            }
        }
    }

    tracing::info!("Console closed, shutting down");
    Ok(())
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<CogEvent>) {
    loop {
        match events.recv().await {
            Ok(CogEvent::RolledBack { id, reason }) => {
                tracing::warn!(cog = %id, reason = %reason, "Reload rolled back");
            }
            Ok(CogEvent::Failed { id, reason }) => {
                tracing::error!(cog = %id, reason = %reason, "Cog is unavailable");
            }
            Ok(event) => tracing::debug!(?event, "Cog event"),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Cog event listener lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn init_config() -> Result<(), BotError> {
    let yaml = Config::default().to_yaml()?;
    println!("{}", yaml);
    println!("\nSave this to config.yaml and adjust as needed.");
    Ok(())
}
