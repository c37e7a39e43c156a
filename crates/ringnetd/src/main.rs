//! ringnetd — one node of the ring network.
//!
//! Wires the four runtime activities together: the engine actor, the UDP
//! receive and send loops, the watchdog ticker (generator only), and the
//! operator console on stdin. Log lines go to the node's log file so the
//! terminal stays free for commands.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use ringnet_core::config::RingConfig;
use ringnet_node::{transport, watchdog, Engine, EngineSettings, NodeIdentity};

mod console;

#[tokio::main]
async fn main() -> Result<()> {
    let Some(config_path) = std::env::args().nth(1).map(PathBuf::from) else {
        bail!("usage: ringnetd <config-file>");
    };

    let config = RingConfig::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let _log_guard = init_logging(&config);

    println!("=== ringnet node ===");
    println!("  name       : {}", config.name);
    println!("  downstream : {}", config.next_addr);
    println!("  token hold : {}s", config.hold_secs);
    println!("  generator  : {}", config.generates_token);
    println!("  listening  : udp port {}", config.listen_port);
    println!("  log file   : {}", config.log_file.display());

    let port = transport::bind(config.listen_port, &config.next_addr)
        .await
        .context("failed to bind ring transport")?;

    let identity = NodeIdentity::from_config(&config);
    let (engine, handle, outbox) = Engine::new(identity, EngineSettings::default());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let engine_task = tokio::spawn(engine.run());
    let recv_task = tokio::spawn(transport::recv_loop(
        port.socket.clone(),
        handle.events(),
        shutdown_rx.clone(),
    ));
    let send_task = tokio::spawn(transport::send_loop(
        port.socket.clone(),
        port.downstream,
        outbox,
    ));
    let watchdog_task = config.generates_token.then(|| {
        tokio::spawn(watchdog::run(
            config.hold_duration(),
            handle.events(),
            shutdown_rx,
        ))
    });

    console::run(handle.clone(), config).await?;

    // Console returned: stop everything and wait for a clean exit. The send
    // loop ends by itself once the engine drops its outbox sender.
    handle.stop().await;
    let _ = shutdown_tx.send(true);
    let _ = engine_task.await;
    let _ = recv_task.await;
    let _ = send_task.await;
    if let Some(task) = watchdog_task {
        let _ = task.await;
    }

    tracing::info!("node stopped");
    Ok(())
}

/// Point tracing at the node's log file; fall back to stderr if the file
/// cannot be created. The returned guard must stay alive for the writer to
/// flush.
fn init_logging(config: &RingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match std::fs::File::create(&config.log_file) {
        Ok(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        Err(error) => {
            eprintln!(
                "warning: could not open log file {}: {error}",
                config.log_file.display()
            );
            eprintln!("logs will go to stderr instead");
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}
