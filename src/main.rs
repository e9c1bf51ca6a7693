mod cli;
mod commands;
mod output;

use clap::{CommandFactory, Parser};
use cli::{Cli, Commands, DbCommands};
use pressbox::{AppConfig, Error as PressboxError, Orchestrator};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(pressbox_error) = e.downcast_ref::<PressboxError>() {
            eprintln!("Error: {}", pressbox_error);
            if let Some(suggestion) = pressbox_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    // ── Commands that need no data directory ──────────────────────────
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        let bin_name = cmd.get_name().to_string();
        clap_complete::generate(*shell, &mut cmd, bin_name, &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = AppConfig::resolve_data_dir(cli.home.clone())?;
    let config = AppConfig::load(data_dir)?;

    // Read-only commands work while another pressbox process serves sites.
    let readonly = matches!(
        cli.command,
        Commands::List { .. } | Commands::Db(DbCommands::Status { .. })
    );
    let orchestrator = Orchestrator::builder()
        .config(config)
        .lock_data_dir(!readonly)
        .build()
        .await?;
    let out = &output::CliOutput;

    match cli.command {
        Commands::Create {
            name,
            engine,
            domain,
            wordpress_version,
            php_version,
            admin_user,
            admin_email,
            json,
        } => {
            commands::run_create(
                &orchestrator,
                name,
                engine,
                domain,
                wordpress_version,
                php_version,
                admin_user,
                admin_email,
                json,
                out,
            )
            .await?;
        }
        Commands::List { json } => commands::run_list(&orchestrator, json, out)?,
        Commands::Up { sites } => commands::run_up(&orchestrator, sites, out).await?,
        Commands::Delete { site, force } => {
            commands::run_delete(&orchestrator, site, force, out).await?;
        }
        Commands::Db(DbCommands::Status { json }) => {
            commands::run_db_status(&orchestrator, json, out).await?;
        }
        Commands::Db(DbCommands::Start { engine }) => {
            commands::run_db_start(&orchestrator, engine, out).await?;
        }
        Commands::Db(DbCommands::Stop { engine }) => {
            commands::run_db_stop(&orchestrator, engine, out).await?;
        }
        Commands::Completions { .. } => unreachable!("handled before loading config"),
    }

    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
