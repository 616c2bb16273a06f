//! # botlink
//!
//! Command-line client: starts or connects to a bot, prints session events,
//! and sends each stdin line to the bot as text.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};

use botlink_client::{
    AuthRequest, BotClient, ClientOptions, EventCallbacks, FunctionCallReply, WebSocketTransport,
};
use botlink_core::TransportState;
use botlink_core::types::{BotReadyData, BotText, LlmFunctionCallData, SendTextOptions, Transcript};
use botlink_settings::ClientSettings;

/// Talk to a real-time bot from the terminal.
#[derive(Parser, Debug)]
#[command(name = "botlink", about = "Talk to a real-time bot from the terminal")]
struct Cli {
    /// Settings file (defaults to `~/.botlink/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter, overriding settings.
    #[arg(long)]
    log_level: Option<String>,

    /// Answer calls to this function with their own arguments. Repeatable.
    #[arg(long = "echo-function", global = true)]
    echo_functions: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Authorize through the start endpoint, then connect.
    Start {
        /// Start endpoint, overriding settings.
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Connect straight to a bot WebSocket.
    Connect {
        /// WebSocket URL, overriding settings.
        #[arg(long)]
        url: Option<String>,
    },
}

/// Prints events to stdout.
struct PrintCallbacks;

impl EventCallbacks for PrintCallbacks {
    fn on_transport_state_changed(&self, state: TransportState) {
        println!("[state] {state}");
    }

    fn on_bot_ready(&self, data: &BotReadyData) {
        println!("[ready] protocol {}", data.version);
    }

    fn on_disconnected(&self) {
        println!("[disconnected]");
    }

    fn on_backend_error(&self, message: &str) {
        eprintln!("[error] {message}");
    }

    fn on_user_transcript(&self, transcript: &Transcript) {
        if transcript.is_final {
            println!("[you] {}", transcript.text);
        }
    }

    fn on_bot_transcript(&self, text: &str) {
        println!("[bot] {text}");
    }

    fn on_bot_llm_text(&self, data: &BotText) {
        tracing::trace!(text = %data.text, "llm text");
    }

    fn on_server_message(&self, data: &Value) {
        println!("[server] {data}");
    }

    fn on_llm_function_call(&self, call: &LlmFunctionCallData) {
        println!("[call] {}({})", call.function_name, call.args);
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<ClientSettings> {
    let settings = match path {
        Some(path) => botlink_settings::load_settings_from_path(path),
        None => botlink_settings::load_settings(),
    };
    settings.context("failed to load settings")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = load_settings(args.settings.as_ref())?;

    let level = args.log_level.as_deref().unwrap_or(&settings.logging.level);
    if settings.logging.json {
        botlink_core::logging::init_json_subscriber(level);
    } else {
        botlink_core::logging::init_subscriber(level);
    }

    let options = ClientOptions::from_settings(&settings, Arc::new(PrintCallbacks));
    let client = BotClient::new(Arc::new(WebSocketTransport::new()), options)
        .context("failed to create client")?;

    for name in &args.echo_functions {
        client
            .register_function_call_handler(
                name.clone(),
                |call: LlmFunctionCallData, reply: FunctionCallReply| {
                    reply.send(json!({ "echo": call.args }));
                },
            )
            .wait()
            .await?;
    }

    client.init_devices().wait().await?;
    match args.command {
        Command::Start { endpoint } => {
            let mut request = AuthRequest::from_settings(&settings.auth);
            if let Some(endpoint) = endpoint {
                request = Some(match request {
                    Some(request) => AuthRequest { endpoint, ..request },
                    None => AuthRequest::new(endpoint),
                });
            }
            let request = request.ok_or_else(|| anyhow!("no start endpoint configured"))?;
            let _ = client.start_bot_and_connect(request).wait().await?;
        }
        Command::Connect { url } => {
            let params = url.map_or_else(|| json!({}), |url| json!({ "url": url }));
            client.connect(params).wait().await?;
        }
    }

    let result = chat(&client).await;
    let _ = client.disconnect().wait().await;
    client.release();
    result
}

/// Forward stdin lines until EOF, Ctrl-C, or the session ends.
async fn chat(client: &BotClient) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut state = client.subscribe_state();
    let options = SendTextOptions::default();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Err(e) = client.send_text(line, &options).wait().await {
                    eprintln!("[error] {e}");
                }
            }
            changed = state.wait_for(|s| *s == TransportState::Disconnected) => {
                changed?;
                return Ok(());
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                return Ok(());
            }
        }
    }
}
