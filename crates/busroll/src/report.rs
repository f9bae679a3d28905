//! Attendance reports.
//!
//! Everything here is a pure read. Present and absent sets are derived from
//! the bus's current students and the trip's attendance records; the stored
//! counters are only used where a finished trip's summary is wanted.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{AttendanceRecord, Bus, Student, Trip, TripStatus};
use crate::session::Session;
use crate::store::Records;

/// Split students into present and absent by attendance membership on id.
///
/// Records whose student no longer exists count toward neither set.
#[must_use]
pub fn partition(
    students: Vec<Student>,
    records: &[AttendanceRecord],
) -> (Vec<Student>, Vec<Student>) {
    let scanned: HashSet<&str> = records.iter().map(|r| r.student_id.as_str()).collect();
    students
        .into_iter()
        .partition(|s| scanned.contains(s.id.as_str()))
}

/// Present and absent students of one trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripReport {
    /// The bus the trip belongs to.
    pub bus: Bus,
    /// The trip as stored.
    pub trip: Trip,
    /// Students with an attendance record.
    pub present: Vec<Student>,
    /// Students without one.
    pub absent: Vec<Student>,
}

/// Report filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportFilter {
    /// Exact bus name.
    pub bus_name: Option<String>,
    /// Trip status.
    pub status: Option<TripStatus>,
    /// First day included, by the trip's start in the organization timezone.
    pub from: Option<NaiveDate>,
    /// Last day included.
    pub to: Option<NaiveDate>,
}

impl ReportFilter {
    fn matches(&self, bus: &Bus, trip: &Trip, timezone: Tz) -> bool {
        if self.bus_name.as_deref().is_some_and(|name| name != bus.name) {
            return false;
        }
        if self.status.is_some_and(|status| status != trip.status) {
            return false;
        }
        let started = trip.started_at.with_timezone(&timezone).date_naive();
        if self.from.is_some_and(|from| started < from) {
            return false;
        }
        if self.to.is_some_and(|to| started > to) {
            return false;
        }
        true
    }
}

/// One line of the trip report list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripReportRow {
    /// Owning bus.
    pub bus_id: String,
    /// Bus display name.
    pub bus_name: String,
    /// Trip id.
    pub trip_id: String,
    /// Trip status.
    pub status: TripStatus,
    /// Operating day.
    pub date: NaiveDate,
    /// When the trip was opened.
    pub started_at: DateTime<Utc>,
    /// Current students with an attendance record. Records for unknown ids
    /// are not counted, so present plus absent is the roster size.
    pub present_count: usize,
    /// Current students without an attendance record.
    pub absent_count: usize,
    /// Names of the present students.
    pub present_names: Vec<String>,
}

/// A trip as listed on the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardTrip {
    /// Bus display name.
    pub bus_name: String,
    /// The trip with its stored counters.
    #[serde(flatten)]
    pub trip: Trip,
}

/// Fleet-wide trip statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    /// Trips across all buses.
    pub total_trips: usize,
    /// Trips still open.
    pub active_trips: usize,
    /// Sum of stored present counts over finished trips.
    pub total_present: u64,
    /// Newest date first.
    pub trips: Vec<DashboardTrip>,
}

/// Read-only access to attendance statistics. Managers only.
#[derive(Debug, Clone)]
pub struct Reports {
    records: Records,
    timezone: Tz,
}

impl Reports {
    /// Build a reader whose date filters follow `timezone`.
    #[must_use]
    pub fn new(records: Records, timezone: Tz) -> Self {
        Self { records, timezone }
    }

    /// Present and absent students for one trip.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] for supervisors,
    /// [`Error::BusNotFound`], [`Error::TripNotFound`], or a store error.
    pub async fn trip_report(
        &self,
        session: &Session,
        bus_id: &str,
        trip_id: &str,
    ) -> Result<TripReport> {
        session.require_manager("viewing reports")?;
        let bus = self.records.require_bus(bus_id).await?;
        let trip = self
            .records
            .trip(bus_id, trip_id)
            .await?
            .ok_or_else(|| Error::TripNotFound(trip_id.to_string()))?;

        let students = self.records.students(bus_id).await?;
        let attendance = self.records.attendance(bus_id, trip_id).await?;
        let (present, absent) = partition(students, &attendance);

        Ok(TripReport {
            bus,
            trip,
            present,
            absent,
        })
    }

    /// One row per trip across all buses, filtered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] for supervisors or a store error.
    pub async fn trip_reports(
        &self,
        session: &Session,
        filter: &ReportFilter,
    ) -> Result<Vec<TripReportRow>> {
        session.require_manager("viewing reports")?;

        let mut rows = Vec::new();
        for bus in self.records.buses().await? {
            if filter.bus_name.as_deref().is_some_and(|name| name != bus.name) {
                continue;
            }
            let trips = self.records.trips(&bus.id).await?;
            if trips.is_empty() {
                continue;
            }
            let students = self.records.students(&bus.id).await?;

            for trip in trips {
                if !filter.matches(&bus, &trip, self.timezone) {
                    continue;
                }
                let attendance = self.records.attendance(&bus.id, &trip.id).await?;
                let (present, absent) = partition(students.clone(), &attendance);
                rows.push(TripReportRow {
                    bus_id: bus.id.clone(),
                    bus_name: bus.name.clone(),
                    trip_id: trip.id,
                    status: trip.status,
                    date: trip.date,
                    started_at: trip.started_at,
                    present_count: present.len(),
                    absent_count: absent.len(),
                    present_names: present.into_iter().map(|s| s.name).collect(),
                });
            }
        }
        Ok(rows)
    }

    /// Totals and the trip list for the dashboard.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] for supervisors or a store error.
    pub async fn dashboard_summary(&self, session: &Session) -> Result<DashboardSummary> {
        session.require_manager("viewing the dashboard")?;

        let mut trips = Vec::new();
        for bus in self.records.buses().await? {
            for trip in self.records.trips(&bus.id).await? {
                trips.push(DashboardTrip {
                    bus_name: bus.name.clone(),
                    trip,
                });
            }
        }
        trips.sort_by(|a, b| {
            b.trip
                .date
                .cmp(&a.trip.date)
                .then_with(|| b.trip.started_at.cmp(&a.trip.started_at))
        });

        let active_trips = trips.iter().filter(|t| t.trip.is_active()).count();
        let total_present = trips
            .iter()
            .filter(|t| t.trip.status == TripStatus::Finished)
            .map(|t| u64::from(t.trip.present_count))
            .sum();

        Ok(DashboardSummary {
            total_trips: trips.len(),
            active_trips,
            total_present,
            trips,
        })
    }
}

/// Serialize report rows as pretty JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn rows_to_json(rows: &[TripReportRow]) -> Result<String> {
    Ok(serde_json::to_string_pretty(rows)?)
}

/// One line per row, present names listed after the counts.
#[must_use]
pub fn rows_to_plain(rows: &[TripReportRow]) -> String {
    rows.iter()
        .map(|r| {
            let names = if r.present_names.is_empty() {
                "-".to_string()
            } else {
                r.present_names.join(", ")
            };
            format!(
                "{} {} [{}] present {} absent {}: {names}\n",
                r.date, r.bus_name, r.status, r.present_count, r.absent_count
            )
        })
        .collect()
}

/// Render report rows as an aligned text table.
#[must_use]
pub fn rows_to_table(rows: &[TripReportRow]) -> String {
    let bus_width = rows
        .iter()
        .map(|r| r.bus_name.chars().count())
        .chain(std::iter::once("BUS".len()))
        .max()
        .unwrap_or(3);

    let mut out = format!(
        "{:<10}  {:<bus_width$}  {:<8}  {:>7}  {:>6}  {:<16}  {}\n",
        "DATE", "BUS", "STATUS", "PRESENT", "ABSENT", "STARTED (UTC)", "TRIP"
    );
    for r in rows {
        out.push_str(&format!(
            "{:<10}  {:<bus_width$}  {:<8}  {:>7}  {:>6}  {:<16}  {}\n",
            r.date.to_string(),
            r.bus_name,
            r.status.as_str(),
            r.present_count,
            r.absent_count,
            r.started_at.format("%Y-%m-%d %H:%M").to_string(),
            r.trip_id
        ));
    }
    out
}
