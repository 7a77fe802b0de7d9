//! Conductor CLI: split a task across specialist agents from the terminal.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use conductor_cli::commands;
use conductor_core::models::PlanStatus;

/// Conductor: multi-specialist task orchestration
#[derive(Parser)]
#[command(name = "conductor", version, about = "Conductor: multi-specialist task orchestration")]
pub struct Cli {
    /// Workspace root; plans are written under <workspace>/.conductor/plans
    #[arg(long, global = true, env = "CONDUCTOR_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Config file (default: <workspace>/.conductor/config.yaml)
    #[arg(long, global = true, env = "CONDUCTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Additional specialist definition directory (repeatable)
    #[arg(long = "agents-dir", global = true)]
    agents_dirs: Vec<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a task, run it through the specialists and compose the result
    Run(commands::run::RunArgs),

    /// Show how a task would be split, without running anything
    Plan {
        /// The task, in plain language
        task: String,
        /// Route to one specialist or composite category ("auto" classifies)
        #[arg(long)]
        category: Option<String>,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// List available specialists
    Specialists {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Parse and validate a config file
    Validate {
        /// Config file to check (default: the one `--config` or the workspace resolves to)
        file: Option<PathBuf>,
    },
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conductor_core=warn,conductor_cli=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let Some(command) = cli.command else {
        // No subcommand, show help
        use clap::CommandFactory;
        Cli::command().print_help().ok();
        println!();
        return;
    };

    let load = || commands::load_context(cli.workspace.as_deref(), cli.config.as_deref(), &cli.agents_dirs);

    let result: Result<Option<PlanStatus>, String> = match command {
        Commands::Run(args) => match load() {
            Ok(ctx) => commands::run::run(&ctx, &args).await.map(Some),
            Err(e) => Err(e),
        },
        Commands::Plan { task, category, json } => match load() {
            Ok(ctx) => commands::plan::run(&ctx, &task, category.as_deref(), json).await.map(|_| None),
            Err(e) => Err(e),
        },
        Commands::Specialists { json } => load().and_then(|ctx| commands::specialists::run(&ctx, json)).map(|_| None),
        Commands::Config { action } => match action {
            ConfigAction::Validate { file } => {
                let path = file.or_else(|| cli.config.clone()).or_else(|| {
                    let ws = cli.workspace.clone().or_else(|| std::env::current_dir().ok())?;
                    conductor_core::ConductorConfig::default_path(&ws)
                });
                match path {
                    Some(path) => commands::config::validate(&path).map(|msg| {
                        println!("{}", msg);
                        None
                    }),
                    None => Err("No config file found; pass one or use --config".to_string()),
                }
            }
            ConfigAction::Show => load().and_then(|ctx| commands::config::show(&ctx)).map(|yaml| {
                print!("{}", yaml);
                None
            }),
        },
    };

    match result {
        Ok(Some(status)) if status != PlanStatus::Completed => std::process::exit(2),
        Ok(_) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
