//! Acquisition daemon lifecycle.
//!
//! Opens the session, runs the sampling loop as a tracked task, and shuts
//! down cleanly on SIGINT or SIGTERM.

use tokio::signal::unix::{self, SignalKind};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::config::SessionConfig;
use crate::session::{Reading, Session};
use crate::tracing::prelude::*;
use crate::transport::Transport;

/// The main daemon.
pub struct Daemon {
    config: SessionConfig,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Daemon {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Run until a shutdown signal arrives or sampling stops on its own.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut session = Session::open(self.config.clone()).await?;
        session.initialize().await?;

        self.tracker
            .spawn(sample_loop(session, self.shutdown.clone()));
        self.tracker.close();

        info!(
            port = %self.config.port,
            interval_ms = self.config.sample_interval.as_millis() as u64,
            "Started."
        );
        info!("For frame-level logging, set RUST_LOG=magdata=trace.");

        let mut sigint = unix::signal(SignalKind::interrupt())?;
        let mut sigterm = unix::signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT.");
            },
            _ = sigterm.recv() => {
                info!("Received SIGTERM.");
            },
            _ = self.tracker.wait() => {},
        }

        self.shutdown.cancel();
        self.tracker.wait().await;
        info!("Exiting.");

        Ok(())
    }
}

/// Sample at the configured cadence until cancelled.
///
/// A failed cycle is logged and the next tick tries again; the adapter
/// dropping off the bus ends the loop.
pub async fn sample_loop<T: Transport>(mut session: Session<T>, shutdown: CancellationToken) {
    let mut ticker = time::interval(session.config().sample_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match session.sample().await {
            Ok(reading) => log_reading(&reading),
            Err(e) if !session.is_connected() => {
                error!(error = %e, "Adapter lost, stopping sampling");
                break;
            }
            Err(e) => warn!(error = %e, "Sample failed"),
        }
    }

    session.close();
}

fn log_reading(reading: &Reading) {
    info!(
        local_c = ?reading.local_temperature.map(|t| t.celsius),
        remote_c = ?reading.remote_temperature.map(|t| t.celsius),
        x_ut = format_args!("{:.3}", reading.field.x),
        y_ut = format_args!("{:.3}", reading.field.y),
        z_ut = format_args!("{:.3}", reading.field.z),
        x_raw = reading.raw.x,
        y_raw = reading.raw.y,
        z_raw = reading.raw.z,
        "Sample"
    );
}
