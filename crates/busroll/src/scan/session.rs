//! One operator's scanning session.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::intake::{IntakeStats, ScanContext, ScanIntake};
use super::source::ScanSource;
use super::{CameraFacing, ScanFeedback};
use crate::config::ScanConfig;
use crate::error::{Error, Result};
use crate::store::Records;

#[derive(Debug)]
struct Running {
    bus_id: String,
    trip_id: String,
    cancel: CancellationToken,
    done: CancellationToken,
    intake: JoinHandle<IntakeStats>,
}

/// Owns a scan source and the intake task for one active trip.
///
/// At most one capture runs at a time; `start` tears down a previous one.
/// Feedback from every capture goes to the sender given at construction.
#[derive(Debug)]
pub struct ScanSession {
    source: Box<dyn ScanSource>,
    records: Records,
    feedback: mpsc::Sender<ScanFeedback>,
    release_delay: Duration,
    channel_capacity: usize,
    facing: CameraFacing,
    running: Option<Running>,
}

impl ScanSession {
    /// Build an idle session.
    #[must_use]
    pub fn new(
        source: Box<dyn ScanSource>,
        records: Records,
        config: &ScanConfig,
        feedback: mpsc::Sender<ScanFeedback>,
    ) -> Self {
        Self {
            source,
            records,
            feedback,
            release_delay: Duration::from_millis(config.release_delay_ms),
            channel_capacity: config.channel_capacity.max(1),
            facing: config.default_facing,
            running: None,
        }
    }

    /// Start scanning for a trip.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveTrip`] unless `trip_id` is an active trip of
    /// `bus_id`, or an error if the source fails to start.
    pub async fn start(&mut self, bus_id: &str, trip_id: &str) -> Result<()> {
        let trip = self.records.trip(bus_id, trip_id).await?;
        if !trip.is_some_and(|t| t.is_active()) {
            return Err(Error::no_active_trip(bus_id));
        }

        self.stop().await?;

        let (events_tx, events_rx) = mpsc::channel(self.channel_capacity);
        self.source.start(self.facing, events_tx)?;

        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        let intake = ScanIntake::new(
            ScanContext::new(self.records.clone(), bus_id, trip_id),
            self.release_delay,
            self.feedback.clone(),
            cancel.clone(),
        );
        let finished = done.clone();
        let intake = tokio::spawn(async move {
            let stats = intake.run(events_rx).await;
            finished.cancel();
            stats
        });

        self.running = Some(Running {
            bus_id: bus_id.to_string(),
            trip_id: trip_id.to_string(),
            cancel,
            done,
            intake,
        });
        info!(bus_id, trip_id, facing = %self.facing, "Scanning started");
        Ok(())
    }

    /// Stop scanning. Stopping an idle session is a no-op and returns `None`.
    ///
    /// The camera is released first; a payload already being processed is
    /// finished before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the source fails to stop.
    pub async fn stop(&mut self) -> Result<Option<IntakeStats>> {
        let Some(running) = self.running.take() else {
            return Ok(None);
        };

        let stopped = self.source.stop();
        running.cancel.cancel();
        let stats = match running.intake.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Scan intake task failed");
                IntakeStats::default()
            }
        };
        stopped?;

        info!(
            bus_id = %running.bus_id,
            trip_id = %running.trip_id,
            processed = stats.processed,
            "Scanning stopped"
        );
        Ok(Some(stats))
    }

    /// Flip to the other camera, restarting the capture if one is running.
    ///
    /// # Errors
    ///
    /// Returns an error if the restart fails.
    pub async fn switch_camera(&mut self) -> Result<CameraFacing> {
        self.facing = self.facing.toggled();
        let target = self
            .running
            .as_ref()
            .map(|r| (r.bus_id.clone(), r.trip_id.clone()));

        if let Some((bus_id, trip_id)) = target {
            self.stop().await?;
            self.start(&bus_id, &trip_id).await?;
        }
        Ok(self.facing)
    }

    /// Wait until the running capture ends on its own (source exhausted).
    ///
    /// Returns immediately when idle.
    pub async fn closed(&self) {
        if let Some(running) = &self.running {
            running.done.cancelled().await;
        }
    }

    /// Whether a capture is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| !r.done.is_cancelled())
    }

    /// Camera used by the next (or current) capture.
    #[must_use]
    pub fn facing(&self) -> CameraFacing {
        self.facing
    }

    /// Trip being scanned, if any.
    #[must_use]
    pub fn trip_id(&self) -> Option<&str> {
        self.running.as_ref().map(|r| r.trip_id.as_str())
    }
}
