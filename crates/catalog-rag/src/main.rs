use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use catalog_rag::{
    ChatRequest, ExtractionStrategy, InMemoryCatalog, Message, OpenAiCompatibleClient, Overrides,
    RagConfig, RetrievalMode, SimpleRagChat,
};

#[derive(Parser)]
#[command(name = "catalog-ask")]
#[command(about = "Ask a product question against a catalog file", long_about = None)]
#[command(version)]
struct Cli {
    /// Catalog seed file (JSON array of items)
    #[arg(short, long, env = "CATALOG_PATH")]
    catalog: PathBuf,

    /// JSON config file; read from the environment when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Retrieval mode (hybrid when omitted)
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,

    /// Number of catalog items to ground the answer on
    #[arg(short, long)]
    top: Option<usize>,

    /// Sampling temperature for the answer
    #[arg(long)]
    temperature: Option<f64>,

    /// Let the model rewrite the question into a search with filters
    #[arg(long)]
    rewrite: bool,

    /// Print the answer as it is generated
    #[arg(long)]
    stream: bool,

    /// JSON request body (`messages` plus optional `overrides`) instead of a question
    #[arg(long, conflicts_with = "question")]
    request: Option<PathBuf>,

    /// The question to answer
    #[arg(required_unless_present = "request")]
    question: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Text,
    Vectors,
    Hybrid,
}

impl From<ModeArg> for RetrievalMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Text => RetrievalMode::Text,
            ModeArg::Vectors => RetrievalMode::Vectors,
            ModeArg::Hybrid => RetrievalMode::Hybrid,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RagConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RagConfig::from_env().context("loading config from environment")?,
    };

    let catalog = InMemoryCatalog::from_json_file(&cli.catalog)?.with_rrf_k(config.search.rrf_k);
    let chat_client = OpenAiCompatibleClient::from_chat_config(&config.chat)?;
    let embed_client = OpenAiCompatibleClient::from_embedding_config(&config.embedding)?;

    let strategy = if cli.rewrite {
        ExtractionStrategy::ToolRewrite
    } else {
        ExtractionStrategy::Direct
    };
    let chat = SimpleRagChat::from_config(
        &config,
        Arc::new(catalog),
        Arc::new(chat_client),
        Arc::new(embed_client),
    )?
    .with_strategy(strategy);

    let request = match (&cli.request, cli.question) {
        (Some(path), _) => {
            let body = std::fs::read_to_string(path)
                .with_context(|| format!("reading request from {}", path.display()))?;
            serde_json::from_str::<ChatRequest>(&body).context("parsing request body")?
        }
        (None, Some(question)) => ChatRequest {
            messages: vec![Message::user(question)],
            overrides: Overrides {
                retrieval_mode: cli.mode.map(RetrievalMode::from),
                top: cli.top,
                temperature: cli.temperature,
                prompt_template: None,
            },
        },
        (None, None) => anyhow::bail!("either a question or --request is required"),
    };
    let (messages, overrides) = (&request.messages, &request.overrides);

    if cli.stream {
        let mut deltas = chat.run_stream(messages, overrides).await?;
        let mut stdout = std::io::stdout();
        while let Some(delta) = deltas.recv().await {
            let delta = delta?;
            if let Some(context) = &delta.context {
                eprintln!("{}", serde_json::to_string_pretty(context)?);
            }
            write!(stdout, "{}", delta.content)?;
            stdout.flush()?;
        }
        writeln!(stdout)?;
    } else {
        let response = chat.run(messages, overrides).await?;
        println!("{}", serde_json::to_string_pretty(&response)?);
    }

    Ok(())
}
