// Main entry point - Dependency injection and pipeline startup
mod application;
mod domain;
mod error;
mod infrastructure;
mod presentation;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::application::pipeline::IngestionPipeline;
use crate::infrastructure::config::load_monitor_config;
use crate::infrastructure::simulated_device::SimulatedDeviceTransport;
use crate::presentation::monitor_state::MonitorState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = load_monitor_config()?;

    // The simulated device stands in for a broker-backed client; a real
    // deployment swaps in another Transport implementation here.
    let transport = Arc::new(SimulatedDeviceTransport::new(&config));

    let pipeline = IngestionPipeline::new(transport, config);
    let state = MonitorState::attach(&pipeline).context("diagnostics already attached")?;

    pipeline.start().await?;
    pipeline.start_logging()?;

    let console = tokio::spawn(run_console(state));

    println!("power-telemetry monitor running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    pipeline.shutdown().await;
    console.abort();

    Ok(())
}

/// Headless stand-in for the dashboard: mirrors the diagnostic stream to
/// stdout and prints a status line with the latest reading every few
/// seconds.
async fn run_console(mut state: MonitorState) {
    let mut status_tick = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            line = state.diagnostics.recv() => match line {
                Some(line) => println!("{line}"),
                None => break,
            },
            _ = status_tick.tick() => {
                let connection = *state.connection.borrow();
                let logging = if state.log_status.borrow().active { "logging" } else { "idle" };
                let retained = state.history_snapshot().time.len();
                let latest = state.latest_sample.borrow().clone();
                if let Some(sample) = latest {
                    let alert = if sample.is_safety_normal() { "" } else { " [ALERT]" };
                    println!(
                        "{connection:?} | {:.1} V  {:.3} A  {:.1} W  {:.1} C  relay {}  {}{alert} | {retained} retained, {} dropped, {} malformed | {logging}",
                        sample.voltage,
                        sample.current,
                        sample.power,
                        sample.temperature,
                        sample.relay.as_str(),
                        sample.safety,
                        state.counters.dropped(),
                        state.counters.malformed(),
                    );
                }
            }
        }
    }
}
