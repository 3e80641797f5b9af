use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use puter_proxy::config::config_search_paths;
use puter_proxy::{build_router, AppState, ProxyConfig, PuterClient, SharedLogger};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "puter-proxy",
    about = "OpenAI- and Anthropic-compatible proxy in front of the Puter AI drivers API",
    version,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP proxy (default)
    Serve(ServeArgs),

    /// Interactive chat against a running proxy
    Chat(ChatArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Request log file (JSONL)
    #[arg(long, default_value = "puter-proxy.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[derive(Args)]
struct ChatArgs {
    /// Base URL of the running proxy
    #[arg(short, long, default_value = "http://localhost:3333")]
    url: String,

    /// Model to request
    #[arg(short, long, default_value = "deepseek-chat")]
    model: String,

    /// Output token cap per reply
    #[arg(long, default_value_t = 2048)]
    max_tokens: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "puter_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command.unwrap_or(Command::Serve(cli.serve)) {
        Command::Serve(args) => serve(args).await,
        Command::Chat(args) => chat(args).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    if args.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(args.config.as_deref())?;
    config.apply_env_overrides()?;
    if let Some(port) = args.port {
        config.port = port;
    }

    let token = config.resolve_auth_token()?;
    if token.is_none() {
        warn!(
            "{} is not set; upstream calls will be unauthenticated",
            config.upstream.auth_token_env
        );
    }

    let logger = SharedLogger::new(&args.log_file)
        .with_context(|| format!("opening log file {}", args.log_file.display()))?;
    let upstream = PuterClient::from_config(&config.upstream, token)?;

    info!("puter-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("  Upstream:  {}", upstream.endpoint());
    info!("  Port:      {}", config.port);
    info!("  Input:     {:?}", config.input_policy);
    match config.routing.forced_model {
        Some(ref forced) => info!("  Routing:   forced to {}", forced),
        None => info!(
            "  Routing:   building={} planning={} reasoning={} fast={}",
            config.routing.models.building,
            config.routing.models.planning,
            config.routing.models.reasoning,
            config.routing.models.fast
        ),
    }
    info!("  Log file:  {}", args.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting puter-proxy upstream={} port={}",
            upstream.endpoint(),
            config.port
        ),
    );

    let port = config.port;
    let state = Arc::new(AppState {
        config,
        upstream,
        logger,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OpenAI:     OPENAI_BASE_URL=http://localhost:{}/v1", port);
    info!("  Anthropic:  ANTHROPIC_BASE_URL=http://localhost:{}", port);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Line-oriented REPL. Each line is sent as a single-turn `/v1/messages`
/// request; `quit` or `exit` leaves.
async fn chat(args: ChatArgs) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let endpoint = format!("{}/v1/messages", args.url.trim_end_matches('/'));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("\nPuter proxy chat at {} (type \"quit\" to exit)\n", args.url);

    loop {
        print!("You: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("quit") || question.eq_ignore_ascii_case("exit") {
            break;
        }

        let body = serde_json::json!({
            "model": args.model,
            "max_tokens": args.max_tokens,
            "messages": [{ "role": "user", "content": question }],
        });

        match ask(&client, &endpoint, &body).await {
            Ok(answer) => println!("\nAssistant: {}\n", answer),
            Err(e) => eprintln!("\nError: {:#}\n", e),
        }
    }

    println!("\nGoodbye!\n");
    Ok(())
}

async fn ask(
    client: &reqwest::Client,
    endpoint: &str,
    body: &serde_json::Value,
) -> anyhow::Result<String> {
    let response = client
        .post(endpoint)
        .json(body)
        .send()
        .await
        .with_context(|| format!("sending request to {}", endpoint))?;

    let status = response.status();
    let value: serde_json::Value = response.json().await.context("reading proxy response")?;

    if !status.is_success() {
        let message = value["error"]["message"].as_str().unwrap_or("unknown error");
        anyhow::bail!("{} {}", status, message);
    }

    Ok(value["content"][0]["text"]
        .as_str()
        .unwrap_or("No response")
        .to_string())
}
