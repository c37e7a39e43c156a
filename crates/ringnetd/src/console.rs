//! Interactive operator console.
//!
//! Reads one command per line from stdin. The console never touches engine
//! state directly — every action goes through the [`EngineHandle`], so the
//! operator sees the same atomic snapshots the protocol works from.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use ringnet_core::config::RingConfig;
use ringnet_core::frame::BROADCAST;
use ringnet_core::queue::QUEUE_CAPACITY;
use ringnet_node::{EngineError, EngineHandle, StatusSnapshot};

/// How many trailing log lines the `logs` command shows.
const LOG_TAIL_LINES: usize = 20;

/// Run the console until `quit` or end of input. Returns when the operator
/// is done; the caller tears the node down.
pub async fn run(handle: EngineHandle, config: RingConfig) -> Result<()> {
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let (command, rest) = match input.split_once(' ') {
            Some((command, rest)) => (command.to_lowercase(), rest.trim()),
            None => (input.to_lowercase(), ""),
        };

        let result = match command.as_str() {
            "send" => cmd_send(&handle, rest).await,
            "broadcast" => cmd_broadcast(&handle, rest).await,
            "status" => cmd_status(&handle).await,
            "queue" => cmd_queue(&handle).await,
            "token" => cmd_token(&handle).await,
            "logs" => {
                print_log_tail(&config.log_file);
                Ok(())
            }
            "help" => {
                print_help();
                Ok(())
            }
            "quit" | "exit" => {
                println!("shutting down...");
                handle.stop().await;
                break;
            }
            other => {
                println!("unknown command {other:?} — type 'help' for the command list");
                Ok(())
            }
        };

        match result {
            Ok(()) => {}
            Err(EngineError::Stopped) => {
                println!("node engine stopped, exiting console");
                break;
            }
            Err(error) => println!("error: {error}"),
        }
    }

    Ok(())
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn cmd_send(handle: &EngineHandle, rest: &str) -> Result<(), EngineError> {
    let Some((destination, payload)) = rest.split_once(' ') else {
        println!("usage: send <destination> <payload>");
        return Ok(());
    };
    let payload = payload.trim();
    handle.enqueue(destination, payload).await?;
    println!("queued for {destination}: {payload}");
    Ok(())
}

async fn cmd_broadcast(handle: &EngineHandle, payload: &str) -> Result<(), EngineError> {
    if payload.is_empty() {
        println!("usage: broadcast <payload>");
        return Ok(());
    }
    handle.enqueue(BROADCAST, payload).await?;
    println!("broadcast queued: {payload}");
    Ok(())
}

async fn cmd_status(handle: &EngineHandle) -> Result<(), EngineError> {
    let status = handle.status().await?;
    print_status(&status);
    Ok(())
}

async fn cmd_queue(handle: &EngineHandle) -> Result<(), EngineError> {
    let queue = handle.queue().await?;
    if queue.is_empty() {
        println!("message queue empty");
        return Ok(());
    }
    println!("Message queue ({}/{}):", queue.len(), QUEUE_CAPACITY);
    for (index, message) in queue.iter().enumerate() {
        println!(
            "  {}. to {} | retries {} | {}",
            index + 1,
            message.destination,
            message.retries,
            message.payload
        );
    }
    Ok(())
}

async fn cmd_token(handle: &EngineHandle) -> Result<(), EngineError> {
    match handle.generate_token().await {
        Ok(()) => {
            println!("new token generated and sent downstream");
            Ok(())
        }
        Err(EngineError::AlreadyHolding) => {
            println!("error: node already holds the token");
            Ok(())
        }
        Err(other) => Err(other),
    }
}

// ── Output helpers ────────────────────────────────────────────────────────────

fn prompt() {
    print!("\n> ");
    let _ = std::io::stdout().flush();
}

fn print_status(status: &StatusSnapshot) {
    let c = &status.counters;
    println!("═══════════════════════════════════════");
    println!("  Node Status");
    println!("═══════════════════════════════════════");
    println!("  Name              : {}", status.name);
    println!("  State             : {}", status.state);
    println!("  Holds token       : {}", status.has_token);
    println!("  Queued messages   : {}", status.queue_len);
    println!(
        "  Last activity     : {}s ago",
        status.last_activity.elapsed().as_secs()
    );
    println!("  Tokens received   : {}", c.tokens_received);
    println!("  Tokens generated  : {}", c.tokens_generated);
    println!("  Frames sent       : {}", c.frames_sent);
    println!("  Frames received   : {}", c.frames_received);
    println!("  Integrity errors  : {}", c.integrity_errors);
}

fn print_log_tail(path: &Path) {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(error) => {
            println!("could not read log file {}: {error}", path.display());
            return;
        }
    };
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);

    println!("═══ last log lines ═══");
    if lines[start..].is_empty() {
        println!("no log lines yet");
    }
    for line in &lines[start..] {
        println!("{line}");
    }
    println!("══════════════════════");
}

fn print_help() {
    println!();
    println!("═══ ringnet console ═══");
    println!("  send <destination> <payload>  queue a unicast message");
    println!("  broadcast <payload>           queue a message for every node");
    println!("  status                        engine state and counters");
    println!("  queue                         pending outbound messages");
    println!("  token                         force token generation");
    println!("  logs                          last {LOG_TAIL_LINES} log lines");
    println!("  help                          this list");
    println!("  quit                          stop the node");
    println!("═══════════════════════");
}
