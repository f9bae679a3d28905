//! Bus and student administration.

use regex::Regex;
use serde::Serialize;
use tracing::info;

use crate::config::StudentConfig;
use crate::error::{Error, Result};
use crate::model::{Bus, Student, Trip};
use crate::scan::StudentBadge;
use crate::session::Session;
use crate::store::records::NewStudent;
use crate::store::Records;

/// A bus with its roster and current trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusOverview {
    /// The bus.
    pub bus: Bus,
    /// Registered students.
    pub students: Vec<Student>,
    /// The active trip, if one is running.
    pub active_trip: Option<Trip>,
    /// Number of trips on record.
    pub trip_count: usize,
}

/// Fleet administration over [`Records`].
#[derive(Debug, Clone)]
pub struct Fleet {
    records: Records,
    national_id_pattern: Option<Regex>,
}

impl Fleet {
    /// Build from records and the student rules.
    ///
    /// # Errors
    ///
    /// Returns an error if the national id pattern is not a valid regex.
    pub fn new(records: Records, students: &StudentConfig) -> Result<Self> {
        let national_id_pattern = students
            .national_id_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| Error::ConfigValidation {
                message: format!("invalid national_id_pattern: {e}"),
            })?;
        Ok(Self {
            records,
            national_id_pattern,
        })
    }

    // === Buses ===

    /// Add a bus.
    ///
    /// # Errors
    ///
    /// Returns an error for supervisors, an empty name, or a store failure.
    pub async fn add_bus(
        &self,
        session: &Session,
        name: &str,
        supervisor_name: Option<&str>,
    ) -> Result<Bus> {
        session.require_manager("adding buses")?;
        let name = non_empty("name", name)?;
        let supervisor_name = supervisor_name.map(str::trim).filter(|s| !s.is_empty());

        let bus = self.records.create_bus(name, supervisor_name).await?;
        info!(bus_id = %bus.id, name = %bus.name, "Bus added");
        Ok(bus)
    }

    /// All buses.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub async fn buses(&self) -> Result<Vec<Bus>> {
        self.records.buses().await
    }

    /// One bus with its roster and active trip.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BusNotFound`] or a store error.
    pub async fn overview(&self, bus_id: &str) -> Result<BusOverview> {
        let bus = self.records.require_bus(bus_id).await?;
        let students = self.records.students(bus_id).await?;
        let trips = self.records.trips(bus_id).await?;
        let active_trip = trips.iter().find(|t| t.is_active()).cloned();

        Ok(BusOverview {
            bus,
            students,
            active_trip,
            trip_count: trips.len(),
        })
    }

    /// Assign a supervisor to a bus, or clear it with `None`.
    ///
    /// # Errors
    ///
    /// Returns an error for supervisors, an unknown bus, or a store failure.
    pub async fn assign_supervisor(
        &self,
        session: &Session,
        bus_id: &str,
        supervisor_name: Option<&str>,
    ) -> Result<()> {
        session.require_manager("assigning supervisors")?;
        self.records.require_bus(bus_id).await?;

        let supervisor_name = supervisor_name.map(str::trim).filter(|s| !s.is_empty());
        self.records.set_supervisor(bus_id, supervisor_name).await?;
        info!(bus_id, supervisor = ?supervisor_name, "Supervisor assigned");
        Ok(())
    }

    /// Remove a bus with its students, trips and attendance.
    ///
    /// # Errors
    ///
    /// Returns an error for supervisors, an unknown bus, or a store failure.
    /// A failure part way leaves the remaining documents in place.
    pub async fn remove_bus(&self, session: &Session, bus_id: &str) -> Result<()> {
        session.require_manager("removing buses")?;
        self.records.require_bus(bus_id).await?;

        for trip in self.records.trips(bus_id).await? {
            for record in self.records.attendance(bus_id, &trip.id).await? {
                self.records
                    .delete_attendance(bus_id, &trip.id, &record.id)
                    .await?;
            }
            self.records.delete_trip(bus_id, &trip.id).await?;
        }
        for student in self.records.students(bus_id).await? {
            self.records.delete_student(bus_id, &student.id).await?;
        }
        self.records.delete_bus(bus_id).await?;

        info!(bus_id, "Bus removed");
        Ok(())
    }

    // === Students ===

    /// Register a student on a bus.
    ///
    /// # Errors
    ///
    /// Returns an error for supervisors, an unknown bus, invalid fields, or a
    /// store failure.
    pub async fn add_student(
        &self,
        session: &Session,
        bus_id: &str,
        student: NewStudent,
    ) -> Result<Student> {
        session.require_manager("adding students")?;
        let name = non_empty("name", &student.name)?.to_string();
        let national_id = student.national_id.trim().to_string();
        self.check_national_id(&national_id)?;
        self.records.require_bus(bus_id).await?;

        let student = self
            .records
            .add_student(
                bus_id,
                NewStudent {
                    name,
                    national_id,
                    area: student.area.trim().to_string(),
                },
            )
            .await?;
        info!(bus_id, student_id = %student.id, "Student added");
        Ok(student)
    }

    /// Students of a bus.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BusNotFound`] or a store error.
    pub async fn students(&self, bus_id: &str) -> Result<Vec<Student>> {
        self.records.require_bus(bus_id).await?;
        self.records.students(bus_id).await
    }

    /// Remove a student. Past attendance records are kept.
    ///
    /// # Errors
    ///
    /// Returns an error for supervisors, an unknown student, or a store failure.
    pub async fn remove_student(
        &self,
        session: &Session,
        bus_id: &str,
        student_id: &str,
    ) -> Result<()> {
        session.require_manager("removing students")?;
        if !self.records.delete_student(bus_id, student_id).await? {
            return Err(Error::StudentNotFound(student_id.to_string()));
        }
        info!(bus_id, student_id, "Student removed");
        Ok(())
    }

    /// The payload printed on a student's QR badge.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StudentNotFound`] or a store error.
    pub async fn badge_payload(&self, bus_id: &str, student_id: &str) -> Result<String> {
        let student = self
            .records
            .student(bus_id, student_id)
            .await?
            .ok_or_else(|| Error::StudentNotFound(student_id.to_string()))?;
        StudentBadge::from(&student).encode()
    }

    fn check_national_id(&self, national_id: &str) -> Result<()> {
        match &self.national_id_pattern {
            Some(pattern) if !national_id.is_empty() && !pattern.is_match(national_id) => {
                Err(Error::validation(
                    "national id",
                    format!("'{national_id}' does not match {}", pattern.as_str()),
                ))
            }
            _ => Ok(()),
        }
    }
}

fn non_empty<'a>(field: &'static str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        Err(Error::validation(field, "cannot be empty"))
    } else {
        Ok(value)
    }
}
