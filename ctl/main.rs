#![forbid(unsafe_code)]

//! `rate-governor-ctl` — local CLI companion for `rate-governor`.
//!
//! Talks to the daemon's loopback HTTP control plane to show status and
//! to pause or resume by hand.

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(
    name = "rate-governor-ctl",
    about = "Local CLI for the rate-governor daemon",
    version,
    long_about = None
)]
struct Cli {
    /// Control-plane port (must match the daemon's `http_port`).
    #[arg(long, default_value_t = 3030)]
    port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show pause status, usage, tier and detected agent processes.
    Status,

    /// Pause the agent by hand.
    Pause {
        /// Pause length in minutes.
        #[arg(long, default_value_t = 60)]
        minutes: u64,
    },

    /// Clear any pause without resuming the agent.
    Resume,

    /// List recent limit events.
    Events {
        /// Number of events to show.
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// List registered sessions.
    Sessions,

    /// Show how the agent would be resumed right now.
    Strategy,
}

fn main() {
    let args = Cli::parse();
    let base = format!("http://127.0.0.1:{}", args.port);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(send(&base, &args.command)) {
        Ok(Reply::Ok(body)) => {
            if body.is_null() {
                println!("OK");
            } else {
                println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
            }
        }
        Ok(Reply::Failed(message)) => {
            eprintln!("Error: {message}");
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("Failed to connect to daemon: {err}");
            eprintln!("Is rate-governor running with http_port {}?", args.port);
            std::process::exit(1);
        }
    }
}

enum Reply {
    Ok(Value),
    Failed(String),
}

/// Issue the HTTP request for `command` and decode the reply.
async fn send(base: &str, command: &Command) -> Result<Reply, reqwest::Error> {
    let client = reqwest::Client::new();
    let request = match command {
        Command::Status => client.get(format!("{base}/api/status")),
        Command::Pause { minutes } => client
            .post(format!("{base}/api/pause"))
            .json(&json!({ "duration_ms": minutes.saturating_mul(60_000) })),
        Command::Resume => client.post(format!("{base}/api/resume")),
        Command::Events { limit } => client.get(format!("{base}/api/events?limit={limit}")),
        Command::Sessions => client.get(format!("{base}/api/sessions")),
        Command::Strategy => client.get(format!("{base}/api/strategy")),
    };

    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    let value: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(Reply::Ok(value));
    }
    let message = value
        .get("error")
        .and_then(Value::as_str)
        .map_or_else(|| format!("HTTP {status}"), str::to_owned);
    Ok(Reply::Failed(message))
}
