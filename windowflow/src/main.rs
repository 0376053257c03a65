use std::collections::HashMap;
use std::env;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{error, info};
use windowflow_core::{ProcessorBuilder, ProcessorState, Settings, WindowedStreamProcessor};

use crate::records::WindowRecord;

mod records;
mod setup_tracing;

const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    if let Err(e) = run().await {
        error!("{e:?}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let vars: HashMap<String, String> = env::vars().collect();
    let settings = Settings::try_from(vars)?;
    info!(?settings, "Loaded settings");

    let processor =
        Arc::new(ProcessorBuilder::from_settings(settings, records::sum_amounts).build()?);

    let mut registry = Registry::default();
    processor.metrics().register(&mut registry);

    let printer = tokio::spawn(print_results(Arc::clone(&processor)));

    let stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        read = records::read_events(stdin, &processor) => {
            read?;
            info!("Reached end of input");
        }
        _ = shutdown_signal() => {}
    }

    processor.stop().await?;
    printer.await??;

    let mut encoded = String::new();
    encode(&mut encoded, &registry)?;
    info!(metrics = %encoded, "Final metrics");

    Ok(())
}

/// Writes every fired window to stdout as a JSON line till the processor has stopped and every
/// result was consumed.
async fn print_results(processor: Arc<WindowedStreamProcessor<f64>>) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    loop {
        // the output queue is closed once stopped, so a None after that means it is drained
        let stopped = processor.state() == ProcessorState::Stopped;
        match processor.poll_result(RESULT_POLL_INTERVAL).await {
            Some(result) => {
                let mut line = serde_json::to_vec(&WindowRecord::from(result))?;
                line.push(b'\n');
                stdout.write_all(&line).await?;
                stdout.flush().await?;
            }
            None if stopped => break,
            None => {}
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => {
                error!(?e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal");
            }
            Err(e) => {
                error!(?e, "Failed to install terminate signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
