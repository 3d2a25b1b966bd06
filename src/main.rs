use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use jobhost::jobs::builtin::default_handlers;
use jobhost::{Node, NodeConfig, Stream};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::from_env().context("invalid configuration")?;
    let _log_guard = init_tracing(&config);

    let cwd = jobhost::working_directory()?;
    eprintln!("jobhost v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Node: {}", config.name);
    eprintln!("   Working directory: {}", cwd.display());
    eprintln!("   Max jobs: {}", config.max_jobs);
    eprintln!("   Reading JSON streams from stdin, one per line.\n");

    let handlers = default_handlers()?;
    eprintln!("   Job handlers: {} registered", handlers.count());

    let node = Arc::new(Node::new(config, handlers));
    node.spawn_dispatcher()?;

    // Drain the write queue to stdout on a blocking thread.
    let writer = {
        let node = Arc::clone(&node);
        tokio::task::spawn_blocking(move || {
            let outbox = node.outbox();
            let mut stdout = std::io::stdout().lock();
            while let Some(stream) = outbox.wait_next() {
                write_stream(&mut stdout, &stream);
            }
            // Closed: flush whatever was written before shutdown.
            while let Some(stream) = outbox.try_next() {
                write_stream(&mut stdout, &stream);
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match Stream::from_json_line(&line) {
                        Ok(stream) => node.submit(stream),
                        Err(e) => tracing::warn!(error = %e, "Ignoring malformed stream"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Error reading stdin: {}", e);
                    break;
                }
            },
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
        }
    }

    // Shutdown joins the dispatch and job threads; keep that off the async
    // workers.
    let shutdown_node = Arc::clone(&node);
    tokio::task::spawn_blocking(move || shutdown_node.shutdown()).await?;
    writer.await?;

    Ok(())
}

fn write_stream(out: &mut impl Write, stream: &Stream) {
    match stream.to_json_line() {
        Ok(line) => {
            if let Err(e) = writeln!(out, "{line}").and_then(|_| out.flush()) {
                tracing::error!("Failed to write stream: {}", e);
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to encode outbound stream"),
    }
}

/// Stderr logging, plus a daily rolling file when a log directory is set.
fn init_tracing(config: &NodeConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "jobhost.log");
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(file_writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}
