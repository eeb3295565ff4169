use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use graded_retrieval::{
    agent::{Query, RetryController, SessionContext},
    config::{Config, LogFormat},
    langbase::LangbaseClient,
    server::{AppState, McpServer},
    storage::open_trace_store,
    tools::{HttpKnowledgeSource, ToolRegistry},
};

#[derive(Debug, Parser)]
#[command(name = "graded-retrieval", version, about)]
struct Cli {
    /// Do not create missing Langbase pipes on startup.
    #[arg(long, global = true)]
    skip_pipe_setup: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve MCP over stdio (default).
    Serve,
    /// Answer one question and print the outcome as JSON.
    Ask {
        question: String,
        #[arg(long)]
        session_id: Option<String>,
        #[arg(long)]
        topic: Option<String>,
        /// Entity in focus. Repeat for several.
        #[arg(long = "entity")]
        entities: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?config.trace.backend,
        "Graded retrieval starting..."
    );

    let controller = Arc::new(build_controller(&config, cli.skip_pipe_setup).await?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let server = McpServer::new(Arc::new(AppState::new(controller)));
            info!("Server ready, waiting for requests on stdin...");

            if let Err(e) = server.run().await {
                error!(error = %e, "Server error");
                return Err(e.into());
            }
            info!("Server shutdown complete");
        }
        Command::Ask {
            question,
            session_id,
            topic,
            entities,
        } => {
            let mut context = session_id
                .map(SessionContext::new)
                .unwrap_or_else(SessionContext::fresh);
            if let Some(topic) = topic {
                context = context.with_topic(topic);
            }
            context = context.with_entities(entities);

            let outcome = controller.run(&Query::new(question, context)).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    Ok(())
}

async fn build_controller(config: &Config, skip_pipe_setup: bool) -> anyhow::Result<RetryController> {
    let langbase = match LangbaseClient::new(&config.langbase, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %config.langbase.base_url, "Langbase client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize Langbase client");
            return Err(e.into());
        }
    };

    if !skip_pipe_setup {
        info!("Ensuring required Langbase pipes exist...");
        if let Err(e) = langbase.ensure_pipes(&config.pipes).await {
            error!(error = %e, "Failed to ensure pipes exist");
            return Err(e.into());
        }
    }

    let source = HttpKnowledgeSource::new(&config.retrieval)?;
    info!(base_url = %source.base_url(), "Knowledge source initialized");
    let registry = Arc::new(ToolRegistry::with_builtin_tools(Arc::new(source)));

    let store = match open_trace_store(&config.trace).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to open trace store");
            return Err(e.into());
        }
    };

    Ok(RetryController::from_config(
        config,
        Arc::new(langbase),
        registry,
        store,
    )?)
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
