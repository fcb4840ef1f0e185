use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;

use guildhost::application::messaging::RequestParser;
use guildhost::domain::entities::{Actor, Capabilities, EventPayload, TenantContext};
use guildhost::infrastructure::adapters::ConsoleAdapter;
use guildhost::infrastructure::config::Config;
use guildhost::infrastructure::plugins::ModuleLoader;
use guildhost::plugins::ModuleCatalog;
use guildhost::Runtime;

const CONSOLE_ID: &str = "console";

#[derive(Parser)]
#[command(name = "guildhost")]
#[command(about = "Extension runtime for a multi-tenant chat bot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: String,

    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot on the console
    Run,
    /// Show version
    Version,
    /// Generate default config
    InitConfig {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },
    /// List modules found in the modules directory
    Modules,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    match cli.command {
        Commands::Run => run_bot(&cli.config),
        Commands::Version => {
            println!("guildhost v{}", env!("CARGO_PKG_VERSION"));
        }
        Commands::InitConfig { output } => init_config(output.as_deref()),
        Commands::Modules => list_modules(&cli.config),
    }
}

fn load_config(config_path: &str) -> Config {
    if Path::new(config_path).exists() {
        match Config::load(config_path) {
            Ok(config) => config.with_env_overrides(),
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Config::load_env()
            }
        }
    } else {
        tracing::info!("No config at {}, using defaults", config_path);
        Config::load_env()
    }
}

fn run_bot(config_path: &str) {
    let mut config = load_config(config_path);

    // the console user runs owner commands
    if !config.is_owner(CONSOLE_ID) {
        config.bot.owners.push(CONSOLE_ID.to_string());
    }

    tracing::info!("Starting guildhost: {}", config.bot.name);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    rt.block_on(async {
        let console = Arc::new(ConsoleAdapter::new(config.bot.name.clone()));
        let runtime = match Runtime::builder()
            .config(config)
            .platform(console.clone())
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!("Failed to build runtime: {}", e);
                std::process::exit(1);
            }
        };

        let _audit = runtime.start().await;
        run_console_bot(runtime, console).await;
    });
}

async fn run_console_bot(runtime: Arc<Runtime>, console: Arc<ConsoleAdapter>) {
    let parser = RequestParser::new(runtime.config.bot.prefix.clone());
    let actor = Actor::new(CONSOLE_ID)
        .with_username(CONSOLE_ID)
        .with_capabilities(Capabilities::ADMINISTRATOR);
    let tenant = TenantContext::guild(CONSOLE_ID).with_channel(CONSOLE_ID);

    println!("Type {}help for commands, `event <name>` to fire an event, `quit` to exit.", parser.prefix());

    while let Some(input) = console.read_line("> ").await {
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        if let Some(event) = input.strip_prefix("event ") {
            let payload = EventPayload::new(event.trim()).for_tenant(CONSOLE_ID);
            let handled = runtime.dispatch_event(payload).await;
            println!("[EVENT] {} handler(s) completed", handled);
            continue;
        }

        match parser.parse(&input, actor.clone(), tenant.clone()) {
            Some(request) => {
                let outcome = runtime.handle_request(request).await;
                tracing::debug!("Dispatch outcome: {:?}", outcome);
            }
            None => println!("[BOT] Commands start with {} or /", parser.prefix()),
        }
    }

    tracing::info!("Console closed, shutting down");
}

fn init_config(output: Option<&str>) {
    let config = Config::default();
    match output {
        Some(path) => match config.save(path) {
            Ok(()) => println!("Wrote default config to {}", path),
            Err(e) => {
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        },
        None => match serde_yaml::to_string(&config) {
            Ok(yaml) => {
                println!("{}", yaml);
                println!("\nSave this to config.yaml and adjust as needed.");
            }
            Err(e) => {
                tracing::error!("Failed to serialize config: {}", e);
                std::process::exit(1);
            }
        },
    }
}

fn list_modules(config_path: &str) {
    let config = load_config(config_path);
    let catalog = ModuleCatalog::builtin();
    let loader = ModuleLoader::new(config.modules.directory.clone());

    let manifests = loader.discover();
    if manifests.is_empty() {
        println!("No modules found in {}", loader.directory().display());
    }
    for manifest in &manifests {
        let status = if !catalog.contains(&manifest.name) {
            "not compiled in"
        } else if manifest.disabled {
            "disabled"
        } else {
            "available"
        };
        println!("{} v{} - {} [{}]", manifest.name, manifest.version, manifest.description, status);
    }

    for name in catalog.core_names() {
        if !manifests.iter().any(|m| m.name == name) {
            println!("{} (built in, no manifest) [available]", name);
        }
    }
}
