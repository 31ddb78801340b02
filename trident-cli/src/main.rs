//! `agent` — run a single request, stream its progress, or report
//! component health.

use clap::{Parser, Subcommand};

mod build;
mod commands;

#[derive(Parser)]
#[command(name = "agent", version, about = "trident coding-assistant agent runtime")]
struct Cli {
    /// Session id. A fresh one is generated when omitted.
    #[arg(long, global = true)]
    session: Option<String>,

    /// Session store backend.
    #[arg(long, global = true, value_enum, default_value = "memory")]
    store: build::StoreMode,

    /// Root directory for the file/hybrid store.
    #[arg(long, global = true, env = "TRIDENT_STORAGE_ROOT")]
    storage_root: Option<std::path::PathBuf>,

    /// Model provider backend.
    #[arg(long, global = true, value_enum, default_value = "scripted")]
    provider: build::ProviderKind,

    /// Model id passed to the provider.
    #[arg(long, global = true, default_value = "gpt-4o-mini")]
    model: String,

    /// API key for the OpenAI-compatible provider.
    #[arg(long, global = true, env = "TRIDENT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process one request and print the Response as JSON.
    Run {
        /// Request text. Read from stdin when omitted.
        input: Option<String>,
    },
    /// Process one request, printing one JSON object per stream chunk.
    Stream {
        /// Request text. Read from stdin when omitted.
        input: Option<String>,
    },
    /// Print component health as JSON.
    Health,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("error: failed to start runtime: {e}");
        std::process::exit(1);
    });
    let code = runtime.block_on(run(cli));
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let options = build::BuildOptions {
        store: cli.store,
        storage_root: cli.storage_root,
        provider: cli.provider,
        model: cli.model,
        api_key: cli.api_key,
    };
    let dispatcher = match build::dispatcher(options).await {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            eprintln!("error: {e}");
            return e.exit_code();
        }
    };

    let session = cli
        .session
        .map(keel::SessionId::new)
        .unwrap_or_else(keel::SessionId::generate);

    let code = match cli.command {
        Command::Run { input } => commands::run(&dispatcher, input, session).await,
        Command::Stream { input } => commands::stream(&dispatcher, input, session).await,
        Command::Health => commands::health(&dispatcher).await,
    };
    if let Err(e) = dispatcher.shutdown().await {
        tracing::warn!(error = %e, "shutdown reported an error");
    }
    code
}
