use clap::Parser;
use colored::*;
use eyre::{eyre, Context, Result};
use log::info;
use std::io::{BufRead, Write as _};
use std::sync::Arc;

use agentflow::cli::Cli;
use agentflow::config::{self, Config};
use agentflow::llm::OpenAiClient;
use agentflow::mcp::{HttpServerPool, ServerPool, ToolCatalog};
use agentflow::orchestrator::{self, Orchestrator};
use agentflow::transcript::{Session, TurnPayload};

fn setup_logging(verbose: bool, config_level: Option<&str>) {
    let default_level = if verbose {
        "debug"
    } else {
        config_level.unwrap_or("info")
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn print_transcript(session: &Session) {
    for turn in session.turns() {
        match &turn.payload {
            TurnPayload::Message { text } => {
                println!("{} {}", format!("[{}]", turn.agent).green().bold(), text);
            }
            TurnPayload::ToolCall { tool, attempt, .. } => {
                println!(
                    "{} {} (attempt {})",
                    format!("[{}]", turn.agent).cyan(),
                    format!("-> {}", tool).cyan(),
                    attempt
                );
            }
            TurnPayload::ToolResult { ok, content } => {
                let preview: String = content.chars().take(200).collect();
                if *ok {
                    println!("   {}", preview.dimmed());
                } else {
                    println!("   {}", format!("error: {}", preview).red());
                }
            }
        }
    }
}

async fn run_query(orchestrator: &Orchestrator, query: &str) -> Result<()> {
    let session = orchestrator.run_session(query).await?;
    print_transcript(&session);
    Ok(())
}

async fn run_interactive(
    document: &config::AgentsDocument,
    servers: &[config::ServerConfig],
    catalog: &ToolCatalog,
    client: Arc<OpenAiClient>,
    pool: Arc<dyn ServerPool>,
    flow_override: Option<&str>,
) -> Result<()> {
    println!("{}", "agentflow interactive session (quit/exit to leave)".bold());
    let stdin = std::io::stdin();
    loop {
        print!("{} ", ">".blue().bold());
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("quit") || query.eq_ignore_ascii_case("exit") {
            break;
        }

        // A bad flow override fails this query, not the process
        let orchestrator = match Orchestrator::new(
            document,
            servers,
            catalog,
            client.clone(),
            pool.clone(),
            flow_override,
        ) {
            Ok(orchestrator) => orchestrator,
            Err(e) => {
                eprintln!("{}", format!("flow error: {}", e).red());
                continue;
            }
        };
        if let Err(e) = run_query(&orchestrator, query).await {
            eprintln!("{}", format!("session failed: {}", e).red());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    setup_logging(cli.is_verbose(), config.log_level.as_deref());

    let servers_doc =
        config::load_servers(config.servers_path()).context("Failed to load servers document")?;
    let agents_doc = config::load_agents(config.agents_path(), &servers_doc)
        .context("Failed to load agents document")?;

    if agents_doc.enabled_agents().is_empty() {
        return Err(eyre!("no enabled agents configured"));
    }

    let pool: Arc<dyn ServerPool> = Arc::new(HttpServerPool::new(&servers_doc.servers));

    info!(
        "Discovering tools from {} configured servers",
        servers_doc.servers.len()
    );
    let catalog = ToolCatalog::discover_all(pool.as_ref(), &servers_doc.servers).await;
    for server in catalog.failed_servers() {
        eprintln!(
            "{}",
            format!("warning: discovery failed for server '{}'", server).yellow()
        );
    }
    if catalog.total_failure(&servers_doc.servers) {
        return Err(eyre!("tool discovery failed for every enabled server"));
    }
    info!("Discovered {} tools", catalog.total_tools());

    let client = Arc::new(OpenAiClient::new(&config.llm)?);

    let flow_override = cli
        .flow
        .clone()
        .or_else(orchestrator::flow_override_from_env);

    if cli.is_interactive() {
        run_interactive(
            &agents_doc,
            &servers_doc.servers,
            &catalog,
            client,
            pool,
            flow_override.as_deref(),
        )
        .await
    } else {
        let query = cli.query.as_deref().unwrap_or_default();
        let orchestrator = Orchestrator::new(
            &agents_doc,
            &servers_doc.servers,
            &catalog,
            client,
            pool,
            flow_override.as_deref(),
        )?;

        let cancel = orchestrator.cancel_flag();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });

        run_query(&orchestrator, query).await
    }
}
