//! stepwise - terminal client for step-by-step assistant replies

mod config;
mod interrupt;
mod ui;
mod utils;

use std::io::{self, Write};
use std::sync::Arc;

use clap::Parser;
use stepwise_session::{Chat, ChatReply, Conversation, HttpTransport};
use stepwise_wire::StreamClient;
use tracing_subscriber::EnvFilter;

use config::Config;
use interrupt::Interrupts;
use ui::StreamPrinter;

const GREETING: &str = "👋 Hello! I'm your conversion assistant. Ask me things like \
\"convert 10 km to miles\", \"what is 25°C in Fahrenheit?\" or \"convert 100 USD to EUR\".";

const DEFAULT_LOG_FILTER: &str = "stepwise_wire=debug,stepwise_session=debug";

/// stepwise - watch an assistant work through your query step by step
#[derive(Parser, Debug)]
#[command(name = "stepwise")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Query to send (starts interactive mode when omitted)
    query: Option<String>,

    /// Run in non-interactive mode with a single query
    #[arg(short = 'c', long, conflicts_with = "query")]
    command: Option<String>,

    /// Server base URL (default: http://localhost:8000)
    #[arg(long)]
    api_url: Option<String>,

    /// Don't print processing steps
    #[arg(long)]
    no_steps: bool,

    /// Print the final reply and steps as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Check whether the server is healthy and exit
    #[arg(long)]
    health: bool,
}

/// How replies are written to stdout
#[derive(Clone)]
struct Output {
    show_steps: bool,
    json: bool,
    interrupts: Interrupts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load();

    init_logging(args.verbose, config.log_filter.as_deref());

    // Initialize config and exit
    if args.init_config {
        match Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let api_url = config.resolve_api_url(args.api_url.as_deref());
    let mut client = StreamClient::new(api_url);
    if let Some(endpoint) = &config.endpoint {
        client = client.with_path(endpoint.as_str());
    }
    tracing::debug!(url = %client.stream_url(), "Using stream endpoint");

    if args.health {
        let healthy = client.health().await?;
        println!(
            "{}: {}",
            client.base_url(),
            if healthy { "healthy" } else { "unhealthy" }
        );
        if !healthy {
            std::process::exit(1);
        }
        return Ok(());
    }

    let interrupts = Interrupts::new();
    interrupts.install();

    let output = Output {
        show_steps: !args.no_steps && config.show_steps.unwrap_or(true),
        json: args.json,
        interrupts,
    };
    let transport = Arc::new(HttpTransport::with_client(client));

    // Non-interactive mode
    if let Some(query) = args.command.or(args.query) {
        let mut chat = Chat::new(transport);
        let reply = run_query(&mut chat, &query, &output).await?;
        if reply.outcome.is_failed() {
            std::process::exit(1);
        }
        return Ok(());
    }

    let mut chat = Chat::new(transport).with_conversation(Conversation::with_greeting(GREETING));
    run_interactive(&mut chat, &output).await
}

/// Install a stderr subscriber when asked for logs; stdout stays the reply
fn init_logging(verbose: bool, configured: Option<&str>) {
    let filter = if verbose {
        EnvFilter::new(configured.unwrap_or(DEFAULT_LOG_FILTER))
    } else {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => return,
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Send one query, printing the reply as it streams in
async fn run_query(chat: &mut Chat, query: &str, output: &Output) -> anyhow::Result<ChatReply> {
    let printer = (!output.json).then(|| {
        tokio::spawn(ui::follow(
            chat.subscribe(),
            chat.handle(),
            StreamPrinter::new(output.show_steps),
            io::stdout(),
        ))
    });

    // Ctrl-C cancels this query only
    let cancel = output.interrupts.begin();
    let reply = chat.ask(query, cancel).await;
    output.interrupts.end();

    if let Some(handle) = printer {
        handle.await??;
    }

    if output.json {
        println!("{}", serde_json::to_string_pretty(&reply)?);
    } else if output.show_steps && !reply.steps.is_empty() {
        println!("\n{}", ui::render_steps(&reply.steps));
    }

    tracing::debug!(
        outcome = ?reply.outcome,
        applied = reply.stats.applied,
        discarded = reply.stats.discarded,
        "Query finished"
    );

    Ok(reply)
}

async fn run_interactive(chat: &mut Chat, output: &Output) -> anyhow::Result<()> {
    if std::io::IsTerminal::is_terminal(&io::stderr()) {
        if let Some(greeting) = chat.conversation().last_reply() {
            eprintln!("{}", greeting.content);
        }
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input == "/exit" || input == "/quit" {
            break;
        }

        println!();
        run_query(chat, input, output).await?;
        println!();
    }

    Ok(())
}
