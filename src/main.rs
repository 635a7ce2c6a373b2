//! CLI for fcmpush
//!
//! Reads one message as JSON from stdin, sends it and prints the backend's
//! response as JSON. HTTP with retries is the default; `--stream` uses the
//! persistent stream instead.

use std::process::ExitCode;

use clap::Parser;
use fcmpush::config::{Settings, load_config};
use fcmpush::message::{Message, ValidationError, decode, validate};
use fcmpush::utils::logging;
use fcmpush::{FcmError, HttpClient, Response, XmppClient};
use tokio::io::AsyncReadExt;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "fcmpush", about = "Send one push message read from stdin")]
struct Cli {
    /// Send over the persistent stream instead of HTTP
    #[arg(long)]
    stream: bool,
    /// HTTP retries before giving up (default: retry.max_attempts)
    #[arg(long)]
    attempts: Option<u32>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.log.level);

    let response = match run(&cli, &settings).await {
        Ok(response) => response,
        Err(e) => {
            error!("send failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&response) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("failed to print response: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, settings: &Settings) -> Result<Response, FcmError> {
    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;
    let message = decode(&input)?;

    validate(message.as_ref())?;
    let message = message.ok_or(ValidationError::InvalidMessage)?;

    if cli.stream {
        send_stream(message, settings).await
    } else {
        let attempts = cli.attempts.unwrap_or(settings.retry.max_attempts);
        let client = HttpClient::from_settings(&settings.http, &settings.retry)?;
        info!(endpoint = %client.endpoint(), attempts, "sending over HTTP");
        client.send_with_retry(&message, attempts).await
    }
}

async fn send_stream(mut message: Message, settings: &Settings) -> Result<Response, FcmError> {
    if message.message_id.is_empty() {
        message = message.with_generated_id();
    }

    let client = XmppClient::connect(&settings.xmpp, &settings.retry).await?;
    info!(message_id = %message.message_id, "sending over the stream");
    let result = client.send(&message).await;
    client.close().await?;
    result
}
