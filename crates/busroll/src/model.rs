//! Typed entities and their document encoding.
//!
//! Documents use camelCase field names. Decoding validates at the boundary:
//! required fields must be present with the right type, names must be
//! non-empty, and trip status must be a known value. Missing optional strings
//! become empty.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::store::{paths, Document};

/// Calendar date format used for a trip's operating day.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A bus; owns its students and trips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bus {
    /// Document id.
    pub id: String,
    /// Display name, e.g. "Bus 12".
    pub name: String,
    /// Supervisor assigned to the bus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supervisor_name: Option<String>,
}

/// A student registered on one bus. The id is the scan identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    /// Document id, also encoded in the student's QR badge.
    pub id: String,
    /// Display name.
    pub name: String,
    /// National id number; empty if unknown.
    pub national_id: String,
    /// Residential area; empty if unknown.
    pub area: String,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TripStatus {
    /// Scanning is allowed.
    Active,
    /// Closed and reconciled (or force-stopped).
    Finished,
}

impl TripStatus {
    /// The stored string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TripStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "finished" => Ok(Self::Finished),
            other => Err(Error::validation(
                "status",
                format!("unknown trip status '{other}'"),
            )),
        }
    }
}

/// One run of a bus on a calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    /// Document id.
    pub id: String,
    /// Owning bus.
    pub bus_id: String,
    /// Lifecycle status.
    pub status: TripStatus,
    /// Operating day in the organization timezone.
    pub date: NaiveDate,
    /// When the trip was opened.
    pub started_at: DateTime<Utc>,
    /// When the trip was closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Students on the bus at close time.
    pub total_students: u32,
    /// Attendance records at close time.
    pub present_count: u32,
    /// `total_students - present_count`, floored at zero.
    pub absent_count: u32,
}

impl Trip {
    /// Whether scanning is allowed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == TripStatus::Active
    }
}

/// Proof that one student boarded during one trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    /// Document id.
    pub id: String,
    /// Resolved student identity.
    pub student_id: String,
    /// Display name at scan time.
    pub student_name: String,
    /// National id at scan time; empty if unknown.
    pub national_id: String,
    /// Area at scan time; empty if unknown.
    pub area: String,
    /// When the scan was recorded.
    pub scanned_at: DateTime<Utc>,
}

// === Document bodies ===

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BusFields {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervisor_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StudentFields {
    pub name: String,
    #[serde(default)]
    pub national_id: Option<String>,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TripFields {
    pub status: String,
    pub date: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_students: Option<u32>,
    #[serde(default)]
    pub present_count: Option<u32>,
    /// Older trips stored the present count under this name.
    #[serde(default, skip_serializing)]
    pub attendance_count: Option<u32>,
    #[serde(default)]
    pub absent_count: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AttendanceFields {
    pub student_id: String,
    #[serde(default)]
    pub student_name: Option<String>,
    #[serde(default)]
    pub national_id: Option<String>,
    #[serde(default)]
    pub area: Option<String>,
    pub scanned_at: DateTime<Utc>,
}

/// Serialize a document body to a JSON object.
pub(crate) fn to_fields<T: Serialize>(body: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(body)? {
        Value::Object(map) => Ok(map),
        _ => Err(Error::internal("document body did not serialize to an object")),
    }
}

fn from_fields<T: DeserializeOwned>(path: &str, doc: &Document) -> Result<T> {
    serde_json::from_value(Value::Object(doc.fields.clone()))
        .map_err(|e| Error::malformed(path, e.to_string()))
}

fn require_name(path: &str, name: String) -> Result<String> {
    if name.trim().is_empty() {
        Err(Error::malformed(path, "empty name"))
    } else {
        Ok(name)
    }
}

impl Bus {
    pub(crate) fn from_document(doc: &Document) -> Result<Self> {
        let path = paths::document(paths::BUSES, &doc.id);
        let body: BusFields = from_fields(&path, doc)?;
        Ok(Self {
            id: doc.id.clone(),
            name: require_name(&path, body.name)?,
            supervisor_name: body.supervisor_name.filter(|s| !s.trim().is_empty()),
        })
    }
}

impl Student {
    pub(crate) fn from_document(bus_id: &str, doc: &Document) -> Result<Self> {
        let path = paths::document(&paths::students(bus_id), &doc.id);
        let body: StudentFields = from_fields(&path, doc)?;
        Ok(Self {
            id: doc.id.clone(),
            name: require_name(&path, body.name)?,
            national_id: body.national_id.unwrap_or_default(),
            area: body.area.unwrap_or_default(),
            created_at: body.created_at.unwrap_or(doc.created_at),
        })
    }
}

impl Trip {
    pub(crate) fn from_document(bus_id: &str, doc: &Document) -> Result<Self> {
        let path = paths::document(&paths::trips(bus_id), &doc.id);
        let body: TripFields = from_fields(&path, doc)?;

        let status = body
            .status
            .parse::<TripStatus>()
            .map_err(|e| Error::malformed(&path, e.to_string()))?;
        let date = NaiveDate::parse_from_str(&body.date, DATE_FORMAT)
            .map_err(|e| Error::malformed(&path, format!("bad date '{}': {e}", body.date)))?;

        Ok(Self {
            id: doc.id.clone(),
            bus_id: bus_id.to_string(),
            status,
            date,
            started_at: body.started_at,
            ended_at: body.ended_at,
            total_students: body.total_students.unwrap_or(0),
            present_count: body.present_count.or(body.attendance_count).unwrap_or(0),
            absent_count: body.absent_count.unwrap_or(0),
        })
    }
}

impl AttendanceRecord {
    pub(crate) fn from_document(bus_id: &str, trip_id: &str, doc: &Document) -> Result<Self> {
        let path = paths::document(&paths::attendance(bus_id, trip_id), &doc.id);
        let body: AttendanceFields = from_fields(&path, doc)?;
        if body.student_id.is_empty() {
            return Err(Error::malformed(&path, "empty studentId"));
        }
        Ok(Self {
            id: doc.id.clone(),
            student_id: body.student_id,
            student_name: body.student_name.unwrap_or_default(),
            national_id: body.national_id.unwrap_or_default(),
            area: body.area.unwrap_or_default(),
            scanned_at: body.scanned_at,
        })
    }
}
