//! Typed access to the document store.
//!
//! [`Records`] maps entities onto collection paths and decodes every document
//! it reads, so malformed data surfaces as [`Error::MalformedDocument`] here
//! rather than deep inside the trip or scan logic.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Map, Value};

use super::{paths, DocumentStore, Query};
use crate::error::{Error, Result};
use crate::model::{
    to_fields, AttendanceFields, AttendanceRecord, Bus, BusFields, Student, StudentFields, Trip,
    TripFields, TripStatus, DATE_FORMAT,
};

/// Fields for a new student.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewStudent {
    /// Display name.
    pub name: String,
    /// National id number.
    pub national_id: String,
    /// Residential area.
    pub area: String,
}

/// Fields for a new attendance record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttendance {
    /// Resolved student identity.
    pub student_id: String,
    /// Display name.
    pub student_name: String,
    /// National id, possibly empty.
    pub national_id: String,
    /// Area, possibly empty.
    pub area: String,
    /// Scan time.
    pub scanned_at: DateTime<Utc>,
}

/// Reconciled counts written when a trip closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripClose {
    /// Close time.
    pub ended_at: DateTime<Utc>,
    /// Students on the bus.
    pub total_students: u32,
    /// Attendance records.
    pub present_count: u32,
    /// Students without a record.
    pub absent_count: u32,
}

/// Typed repository over a [`DocumentStore`].
#[derive(Debug, Clone)]
pub struct Records {
    store: Arc<dyn DocumentStore>,
}

impl Records {
    /// Wrap a store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    // === Buses ===

    /// Create a bus.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub async fn create_bus(&self, name: &str, supervisor_name: Option<&str>) -> Result<Bus> {
        let body = BusFields {
            name: name.to_string(),
            supervisor_name: supervisor_name.map(str::to_string),
        };
        let id = self.store.create(paths::BUSES, to_fields(&body)?).await?;
        Ok(Bus {
            id,
            name: body.name,
            supervisor_name: body.supervisor_name,
        })
    }

    /// Fetch a bus.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the document is malformed.
    pub async fn bus(&self, bus_id: &str) -> Result<Option<Bus>> {
        self.store
            .get(paths::BUSES, bus_id)
            .await?
            .map(|doc| Bus::from_document(&doc))
            .transpose()
    }

    /// Fetch a bus that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BusNotFound`] if there is no such bus.
    pub async fn require_bus(&self, bus_id: &str) -> Result<Bus> {
        self.bus(bus_id)
            .await?
            .ok_or_else(|| Error::BusNotFound(bus_id.to_string()))
    }

    /// List all buses in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or a document is malformed.
    pub async fn buses(&self) -> Result<Vec<Bus>> {
        self.store
            .list(paths::BUSES, &Query::all())
            .await?
            .iter()
            .map(Bus::from_document)
            .collect()
    }

    /// Set or clear the supervisor of a bus.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn set_supervisor(&self, bus_id: &str, supervisor_name: Option<&str>) -> Result<()> {
        let mut fields = Map::new();
        fields.insert(
            "supervisorName".to_string(),
            supervisor_name.map_or(Value::Null, |s| Value::String(s.to_string())),
        );
        self.store.update(paths::BUSES, bus_id, fields).await
    }

    /// Delete a bus document.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_bus(&self, bus_id: &str) -> Result<bool> {
        self.store.delete(paths::BUSES, bus_id).await
    }

    // === Students ===

    /// Register a student on a bus.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub async fn add_student(&self, bus_id: &str, student: NewStudent) -> Result<Student> {
        let created_at = Utc::now();
        let body = StudentFields {
            name: student.name,
            national_id: Some(student.national_id),
            area: Some(student.area),
            created_at: Some(created_at),
        };
        let id = self
            .store
            .create(&paths::students(bus_id), to_fields(&body)?)
            .await?;
        Ok(Student {
            id,
            name: body.name,
            national_id: body.national_id.unwrap_or_default(),
            area: body.area.unwrap_or_default(),
            created_at,
        })
    }

    /// Fetch a student of a bus.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the document is malformed.
    pub async fn student(&self, bus_id: &str, student_id: &str) -> Result<Option<Student>> {
        self.store
            .get(&paths::students(bus_id), student_id)
            .await?
            .map(|doc| Student::from_document(bus_id, &doc))
            .transpose()
    }

    /// List the students of a bus in registration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or a document is malformed.
    pub async fn students(&self, bus_id: &str) -> Result<Vec<Student>> {
        self.store
            .list(&paths::students(bus_id), &Query::all())
            .await?
            .iter()
            .map(|doc| Student::from_document(bus_id, doc))
            .collect()
    }

    /// Remove a student. Attendance records that reference them stay.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_student(&self, bus_id: &str, student_id: &str) -> Result<bool> {
        self.store
            .delete(&paths::students(bus_id), student_id)
            .await
    }

    // === Trips ===

    /// Create an active trip with zeroed counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub async fn create_trip(
        &self,
        bus_id: &str,
        date: NaiveDate,
        started_at: DateTime<Utc>,
    ) -> Result<Trip> {
        let body = TripFields {
            status: TripStatus::Active.as_str().to_string(),
            date: date.format(DATE_FORMAT).to_string(),
            started_at,
            ended_at: None,
            total_students: Some(0),
            present_count: Some(0),
            attendance_count: None,
            absent_count: Some(0),
        };
        let id = self
            .store
            .create(&paths::trips(bus_id), to_fields(&body)?)
            .await?;
        Ok(Trip {
            id,
            bus_id: bus_id.to_string(),
            status: TripStatus::Active,
            date,
            started_at,
            ended_at: None,
            total_students: 0,
            present_count: 0,
            absent_count: 0,
        })
    }

    /// Fetch a trip.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the document is malformed.
    pub async fn trip(&self, bus_id: &str, trip_id: &str) -> Result<Option<Trip>> {
        self.store
            .get(&paths::trips(bus_id), trip_id)
            .await?
            .map(|doc| Trip::from_document(bus_id, &doc))
            .transpose()
    }

    /// List the trips of a bus in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or a document is malformed.
    pub async fn trips(&self, bus_id: &str) -> Result<Vec<Trip>> {
        self.find_trips(bus_id, &Query::all()).await
    }

    /// Active trips of a bus, optionally restricted to one date.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or a document is malformed.
    pub async fn active_trips(
        &self,
        bus_id: &str,
        date: Option<NaiveDate>,
        limit: Option<usize>,
    ) -> Result<Vec<Trip>> {
        let mut query = Query::all().eq("status", TripStatus::Active.as_str());
        if let Some(date) = date {
            query = query.eq("date", date.format(DATE_FORMAT).to_string());
        }
        query.limit = limit;
        self.find_trips(bus_id, &query).await
    }

    async fn find_trips(&self, bus_id: &str, query: &Query) -> Result<Vec<Trip>> {
        self.store
            .list(&paths::trips(bus_id), query)
            .await?
            .iter()
            .map(|doc| Trip::from_document(bus_id, doc))
            .collect()
    }

    /// Write the reconciled counts and mark a trip finished.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn close_trip(&self, bus_id: &str, trip_id: &str, close: TripClose) -> Result<()> {
        let fields = json!({
            "status": TripStatus::Finished.as_str(),
            "endedAt": close.ended_at,
            "totalStudents": close.total_students,
            "presentCount": close.present_count,
            "absentCount": close.absent_count,
        });
        self.store
            .update(&paths::trips(bus_id), trip_id, into_map(fields))
            .await
    }

    /// Mark a trip finished without touching its counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_finished(
        &self,
        bus_id: &str,
        trip_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        let fields = json!({
            "status": TripStatus::Finished.as_str(),
            "endedAt": ended_at,
        });
        self.store
            .update(&paths::trips(bus_id), trip_id, into_map(fields))
            .await
    }

    /// Delete a trip document.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_trip(&self, bus_id: &str, trip_id: &str) -> Result<bool> {
        self.store.delete(&paths::trips(bus_id), trip_id).await
    }

    // === Attendance ===

    /// First attendance record for a student on a trip.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the document is malformed.
    pub async fn find_attendance(
        &self,
        bus_id: &str,
        trip_id: &str,
        student_id: &str,
    ) -> Result<Option<AttendanceRecord>> {
        let query = Query::all().eq("studentId", student_id).limit(1);
        self.store
            .list(&paths::attendance(bus_id, trip_id), &query)
            .await?
            .first()
            .map(|doc| AttendanceRecord::from_document(bus_id, trip_id, doc))
            .transpose()
    }

    /// Write an attendance record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub async fn add_attendance(
        &self,
        bus_id: &str,
        trip_id: &str,
        record: NewAttendance,
    ) -> Result<AttendanceRecord> {
        let body = AttendanceFields {
            student_id: record.student_id,
            student_name: Some(record.student_name),
            national_id: Some(record.national_id),
            area: Some(record.area),
            scanned_at: record.scanned_at,
        };
        let id = self
            .store
            .create(&paths::attendance(bus_id, trip_id), to_fields(&body)?)
            .await?;
        Ok(AttendanceRecord {
            id,
            student_id: body.student_id,
            student_name: body.student_name.unwrap_or_default(),
            national_id: body.national_id.unwrap_or_default(),
            area: body.area.unwrap_or_default(),
            scanned_at: body.scanned_at,
        })
    }

    /// All attendance records of a trip in scan order.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or a document is malformed.
    pub async fn attendance(&self, bus_id: &str, trip_id: &str) -> Result<Vec<AttendanceRecord>> {
        self.store
            .list(&paths::attendance(bus_id, trip_id), &Query::all())
            .await?
            .iter()
            .map(|doc| AttendanceRecord::from_document(bus_id, trip_id, doc))
            .collect()
    }

    /// Delete one attendance record.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_attendance(&self, bus_id: &str, trip_id: &str, id: &str) -> Result<bool> {
        self.store
            .delete(&paths::attendance(bus_id, trip_id), id)
            .await
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn records() -> Records {
        Records::new(Arc::new(SqliteStore::open_in_memory().expect("failed to create test store")))
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, 10).unwrap()
    }

    #[tokio::test]
    async fn test_bus_round_trip() {
        let records = records();
        let bus = records.create_bus("Bus 4", Some("Huda")).await.unwrap();

        let fetched = records.require_bus(&bus.id).await.unwrap();
        assert_eq!(fetched, bus);
        assert_eq!(records.buses().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_require_missing_bus() {
        let err = records().require_bus("nope").await.unwrap_err();
        assert!(matches!(err, Error::BusNotFound(_)));
    }

    #[tokio::test]
    async fn test_set_and_clear_supervisor() {
        let records = records();
        let bus = records.create_bus("Bus 4", None).await.unwrap();

        records.set_supervisor(&bus.id, Some("Omar")).await.unwrap();
        let bus_after = records.require_bus(&bus.id).await.unwrap();
        assert_eq!(bus_after.supervisor_name.as_deref(), Some("Omar"));

        records.set_supervisor(&bus.id, None).await.unwrap();
        assert!(records
            .require_bus(&bus.id)
            .await
            .unwrap()
            .supervisor_name
            .is_none());
    }

    #[tokio::test]
    async fn test_students_are_scoped_to_bus() {
        let records = records();
        let a = records.create_bus("A", None).await.unwrap();
        let b = records.create_bus("B", None).await.unwrap();

        let student = records
            .add_student(
                &a.id,
                NewStudent {
                    name: "Sara".to_string(),
                    national_id: "284".to_string(),
                    area: "Wakra".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(records.students(&a.id).await.unwrap(), vec![student.clone()]);
        assert!(records.students(&b.id).await.unwrap().is_empty());
        assert!(records.student(&b.id, &student.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_active_trip_queries() {
        let records = records();
        let bus = records.create_bus("A", None).await.unwrap();
        let trip = records
            .create_trip(&bus.id, day(), Utc::now())
            .await
            .unwrap();

        let active = records
            .active_trips(&bus.id, Some(day()), Some(1))
            .await
            .unwrap();
        assert_eq!(active, vec![trip.clone()]);

        let other_day = day().succ_opt().unwrap();
        assert!(records
            .active_trips(&bus.id, Some(other_day), None)
            .await
            .unwrap()
            .is_empty());

        records
            .mark_finished(&bus.id, &trip.id, Utc::now())
            .await
            .unwrap();
        assert!(records
            .active_trips(&bus.id, None, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_close_trip_writes_counts() {
        let records = records();
        let bus = records.create_bus("A", None).await.unwrap();
        let trip = records
            .create_trip(&bus.id, day(), Utc::now())
            .await
            .unwrap();

        let ended_at = Utc::now();
        records
            .close_trip(
                &bus.id,
                &trip.id,
                TripClose {
                    ended_at,
                    total_students: 5,
                    present_count: 3,
                    absent_count: 2,
                },
            )
            .await
            .unwrap();

        let closed = records.trip(&bus.id, &trip.id).await.unwrap().unwrap();
        assert_eq!(closed.status, TripStatus::Finished);
        assert_eq!(closed.ended_at, Some(ended_at));
        assert_eq!(closed.total_students, 5);
        assert_eq!(closed.present_count, 3);
        assert_eq!(closed.absent_count, 2);
        assert_eq!(closed.started_at, trip.started_at);
    }

    #[tokio::test]
    async fn test_find_attendance() {
        let records = records();
        let bus = records.create_bus("A", None).await.unwrap();
        let trip = records
            .create_trip(&bus.id, day(), Utc::now())
            .await
            .unwrap();

        assert!(records
            .find_attendance(&bus.id, &trip.id, "s1")
            .await
            .unwrap()
            .is_none());

        records
            .add_attendance(
                &bus.id,
                &trip.id,
                NewAttendance {
                    student_id: "s1".to_string(),
                    student_name: "Sara".to_string(),
                    national_id: String::new(),
                    area: String::new(),
                    scanned_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let found = records
            .find_attendance(&bus.id, &trip.id, "s1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.student_name, "Sara");
        assert_eq!(records.attendance(&bus.id, &trip.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_trip_surfaces_path() {
        let store = Arc::new(SqliteStore::open_in_memory().expect("failed to create test store"));
        let records = Records::new(store.clone());
        let bus = records.create_bus("A", None).await.unwrap();
        store
            .create(
                &paths::trips(&bus.id),
                into_map(json!({"status": "cancelled", "date": "2025-01-01", "startedAt": "2025-01-01T00:00:00Z"})),
            )
            .await
            .unwrap();

        let err = records.trips(&bus.id).await.unwrap_err();
        assert!(matches!(err, Error::MalformedDocument { .. }));
        assert!(err.to_string().contains("cancelled"));
    }
}
