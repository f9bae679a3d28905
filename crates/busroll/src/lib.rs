//! `busroll` - School-bus trip attendance
//!
//! This library opens and closes bus trips, records boarding students from
//! scanned QR payloads with duplicate suppression, reconciles present and
//! absent counts at close, and reports attendance across the fleet.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod fleet;
pub mod logging;
pub mod model;
pub mod notify;
pub mod report;
pub mod scan;
pub mod session;
pub mod store;
pub mod trip;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{Error, Result};
pub use fleet::Fleet;
pub use logging::init_logging;
pub use model::{AttendanceRecord, Bus, Student, Trip, TripStatus};
pub use notify::{Notifier, TripSummary};
pub use report::Reports;
pub use scan::{ScanFeedback, ScanSession};
pub use session::{Session, SessionFile};
pub use store::{DocumentStore, Records, SqliteStore};
pub use trip::TripManager;
