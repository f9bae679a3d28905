//! The single-consumer scan handler.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::payload::ScanPayload;
use super::{DecodeEvent, ScanFeedback, UNKNOWN_NAME};
use crate::error::Result;
use crate::store::records::NewAttendance;
use crate::store::Records;

/// Processing lock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntakeState {
    /// Ready for the next payload.
    #[default]
    Idle,
    /// One payload is being resolved and recorded.
    Processing,
    /// Processing finished; waiting for the release delay.
    Cooling,
}

/// Counters for one intake run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntakeStats {
    /// Decode events received.
    pub decoded: u64,
    /// Dropped because they equalled the previous payload.
    pub suppressed: u64,
    /// Dropped because the processing lock was held.
    pub locked_out: u64,
    /// Payloads that produced feedback.
    pub processed: u64,
}

/// Where scans are recorded.
#[derive(Debug, Clone)]
pub struct ScanContext {
    records: Records,
    bus_id: String,
    trip_id: String,
}

impl ScanContext {
    /// Record scans for `trip_id` on `bus_id`.
    #[must_use]
    pub fn new(records: Records, bus_id: impl Into<String>, trip_id: impl Into<String>) -> Self {
        Self {
            records,
            bus_id: bus_id.into(),
            trip_id: trip_id.into(),
        }
    }

    /// The bus being scanned.
    #[must_use]
    pub fn bus_id(&self) -> &str {
        &self.bus_id
    }

    /// The trip being scanned.
    #[must_use]
    pub fn trip_id(&self) -> &str {
        &self.trip_id
    }
}

/// Resolve one payload to a student and record attendance.
///
/// Never fails: store errors come back as [`ScanFeedback::ScanError`].
pub async fn process_payload(context: &ScanContext, payload: &str) -> ScanFeedback {
    match resolve_and_record(context, payload).await {
        Ok(feedback) => feedback,
        Err(e) => {
            error!(
                bus_id = %context.bus_id,
                trip_id = %context.trip_id,
                error = %e,
                "Scan processing failed"
            );
            ScanFeedback::ScanError {
                message: e.to_string(),
            }
        }
    }
}

async fn resolve_and_record(context: &ScanContext, payload: &str) -> Result<ScanFeedback> {
    let records = &context.records;
    let bus_id = context.bus_id.as_str();
    let trip_id = context.trip_id.as_str();

    let (student_id, badge_name, student) = match ScanPayload::parse(payload) {
        ScanPayload::Invalid => {
            warn!(bus_id, "Structured payload without an id");
            return Ok(ScanFeedback::InvalidPayload {
                payload: payload.to_string(),
            });
        }
        ScanPayload::Raw(id) => match records.student(bus_id, &id).await? {
            Some(student) => (student.id.clone(), None, Some(student)),
            None => {
                debug!(bus_id, payload, "No student matches payload");
                return Ok(ScanFeedback::StudentNotFound {
                    payload: payload.to_string(),
                });
            }
        },
        ScanPayload::Structured { id, name } => {
            let student = records.student(bus_id, &id).await?;
            (id, name, student)
        }
    };

    let name = badge_name.or_else(|| student.as_ref().map(|s| s.name.clone()));

    if records
        .find_attendance(bus_id, trip_id, &student_id)
        .await?
        .is_some()
    {
        debug!(bus_id, trip_id, student_id = %student_id, "Already recorded");
        return Ok(ScanFeedback::AlreadyRecorded {
            name: name.unwrap_or_else(|| student_id.clone()),
            student_id,
        });
    }

    let (national_id, area) = student
        .map(|s| (s.national_id, s.area))
        .unwrap_or_default();
    let record = records
        .add_attendance(
            bus_id,
            trip_id,
            NewAttendance {
                student_id,
                student_name: name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
                national_id,
                area,
                scanned_at: chrono::Utc::now(),
            },
        )
        .await?;

    info!(
        bus_id,
        trip_id,
        student_id = %record.student_id,
        "Attendance recorded"
    );
    Ok(ScanFeedback::Success {
        student_id: record.student_id,
        name: record.student_name,
    })
}

/// Consumes decode events for one trip and emits feedback.
///
/// One payload is processed at a time, on its own task, so decode events keep
/// arriving (and keep updating the last-seen marker) while the store is busy.
/// The lock is released `release_delay` after processing finishes, and the
/// last-seen marker is cleared at the same moment.
#[derive(Debug)]
pub struct ScanIntake {
    context: Arc<ScanContext>,
    release_delay: Duration,
    state: IntakeState,
    last_seen: Option<String>,
    stats: IntakeStats,
    feedback: mpsc::Sender<ScanFeedback>,
    cancel: CancellationToken,
}

impl ScanIntake {
    /// Build an intake; call [`ScanIntake::run`] to start consuming.
    #[must_use]
    pub fn new(
        context: ScanContext,
        release_delay: Duration,
        feedback: mpsc::Sender<ScanFeedback>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            context: Arc::new(context),
            release_delay,
            state: IntakeState::Idle,
            last_seen: None,
            stats: IntakeStats::default(),
            feedback,
            cancel,
        }
    }

    /// Current lock state.
    #[must_use]
    pub fn state(&self) -> IntakeState {
        self.state
    }

    /// Run until cancelled or until `events` closes.
    ///
    /// A payload already in flight is always finished and reported.
    pub async fn run(mut self, mut events: mpsc::Receiver<DecodeEvent>) -> IntakeStats {
        let mut in_flight: Option<JoinHandle<ScanFeedback>> = None;
        let mut events_open = true;
        let release = sleep(Duration::ZERO);
        tokio::pin!(release);

        info!(
            bus_id = %self.context.bus_id,
            trip_id = %self.context.trip_id,
            "Scan intake started"
        );

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    debug!("Scan intake cancelled");
                    break;
                }

                feedback = join_in_flight(&mut in_flight), if in_flight.is_some() => {
                    in_flight = None;
                    self.finish(feedback).await;
                    release.as_mut().reset(Instant::now() + self.release_delay);
                }

                () = &mut release, if self.state == IntakeState::Cooling => {
                    trace!("Processing lock released");
                    self.state = IntakeState::Idle;
                    self.last_seen = None;
                }

                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        if let Some(payload) = self.accept(event) {
                            let context = Arc::clone(&self.context);
                            in_flight = Some(tokio::spawn(async move {
                                process_payload(&context, &payload).await
                            }));
                        }
                    }
                    None => {
                        debug!("Decode stream closed");
                        events_open = false;
                    }
                },
            }

            if !events_open && in_flight.is_none() {
                break;
            }
        }

        if let Some(handle) = in_flight.take() {
            self.finish(flatten(handle.await)).await;
        }
        self.state = IntakeState::Idle;
        self.last_seen = None;

        info!(
            decoded = self.stats.decoded,
            suppressed = self.stats.suppressed,
            locked_out = self.stats.locked_out,
            processed = self.stats.processed,
            "Scan intake stopped"
        );
        self.stats
    }

    /// Apply duplicate suppression and the lock; return the payload to process.
    fn accept(&mut self, event: DecodeEvent) -> Option<String> {
        self.stats.decoded += 1;

        if self.last_seen.as_deref() == Some(event.payload.as_str()) {
            self.stats.suppressed += 1;
            trace!("Immediate duplicate dropped");
            return None;
        }
        self.last_seen = Some(event.payload.clone());

        if self.state != IntakeState::Idle {
            self.stats.locked_out += 1;
            trace!(state = ?self.state, "Payload dropped while locked");
            return None;
        }

        self.state = IntakeState::Processing;
        Some(event.payload)
    }

    async fn finish(&mut self, feedback: ScanFeedback) {
        self.stats.processed += 1;
        self.state = IntakeState::Cooling;
        debug!(%feedback, "Payload processed");
        if self.feedback.send(feedback).await.is_err() {
            debug!("Feedback receiver dropped");
        }
    }
}

async fn join_in_flight(in_flight: &mut Option<JoinHandle<ScanFeedback>>) -> ScanFeedback {
    match in_flight {
        Some(handle) => flatten(handle.await),
        None => std::future::pending().await,
    }
}

fn flatten(joined: std::result::Result<ScanFeedback, JoinError>) -> ScanFeedback {
    joined.unwrap_or_else(|e| ScanFeedback::ScanError {
        message: format!("scan task failed: {e}"),
    })
}
