//! QR scan intake.
//!
//! A [`ScanSource`] (the camera) pushes decoded payloads as [`DecodeEvent`]s.
//! [`ScanIntake`] consumes them one at a time: immediate duplicates are
//! dropped, a processing lock keeps one payload in flight, and each processed
//! payload yields one [`ScanFeedback`]. [`ScanSession`] ties a source and an
//! intake task to one active trip.

mod intake;
mod payload;
mod session;
mod source;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use intake::{process_payload, IntakeState, IntakeStats, ScanContext, ScanIntake};
pub use payload::{ScanPayload, StudentBadge};
pub use session::ScanSession;
pub use source::{LineSource, ScanSource};

/// Display name recorded when a payload carries none.
pub const UNKNOWN_NAME: &str = "unknown";

/// Which camera the source reads from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    /// User-facing camera.
    Front,
    /// Environment-facing camera.
    #[default]
    Back,
}

impl CameraFacing {
    /// The other camera.
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Front => Self::Back,
            Self::Back => Self::Front,
        }
    }
}

impl fmt::Display for CameraFacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Front => f.write_str("front"),
            Self::Back => f.write_str("back"),
        }
    }
}

/// One decoded QR payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeEvent {
    /// The decoded text, compared verbatim for duplicate suppression.
    pub payload: String,
}

impl DecodeEvent {
    /// Wrap a decoded payload.
    #[must_use]
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// Outcome of processing one payload, shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanFeedback {
    /// A new attendance record was written.
    Success {
        /// Resolved student.
        student_id: String,
        /// Recorded display name.
        name: String,
    },
    /// The student already has a record on this trip.
    AlreadyRecorded {
        /// Resolved student.
        student_id: String,
        /// Name to show.
        name: String,
    },
    /// No student on this bus matches the payload.
    StudentNotFound {
        /// The payload as decoded.
        payload: String,
    },
    /// A structured payload without a usable id.
    InvalidPayload {
        /// The payload as decoded.
        payload: String,
    },
    /// Processing failed unexpectedly.
    ScanError {
        /// What went wrong.
        message: String,
    },
}

impl ScanFeedback {
    /// Whether a record was written.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl fmt::Display for ScanFeedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { name, .. } => write!(f, "recorded: {name}"),
            Self::AlreadyRecorded { name, .. } => write!(f, "already recorded: {name}"),
            Self::StudentNotFound { .. } => f.write_str("student not found"),
            Self::InvalidPayload { .. } => f.write_str("invalid QR code"),
            Self::ScanError { message } => write!(f, "scan error: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_facing_toggle() {
        assert_eq!(CameraFacing::Back.toggled(), CameraFacing::Front);
        assert_eq!(CameraFacing::Front.toggled(), CameraFacing::Back);
        assert_eq!(CameraFacing::default(), CameraFacing::Back);
    }

    #[test]
    fn test_camera_facing_serde() {
        assert_eq!(
            serde_json::to_string(&CameraFacing::Front).unwrap(),
            "\"front\""
        );
    }

    #[test]
    fn test_feedback_display() {
        let fb = ScanFeedback::Success {
            student_id: "s1".to_string(),
            name: "Sara".to_string(),
        };
        assert_eq!(fb.to_string(), "recorded: Sara");
        assert!(fb.is_success());

        let fb = ScanFeedback::InvalidPayload {
            payload: "{}".to_string(),
        };
        assert_eq!(fb.to_string(), "invalid QR code");
        assert!(!fb.is_success());
    }

    #[test]
    fn test_feedback_serializes_with_outcome_tag() {
        let fb = ScanFeedback::AlreadyRecorded {
            student_id: "s1".to_string(),
            name: "Sara".to_string(),
        };
        let json = serde_json::to_value(&fb).unwrap();
        assert_eq!(json["outcome"], "already_recorded");
        assert_eq!(json["name"], "Sara");
    }
}
