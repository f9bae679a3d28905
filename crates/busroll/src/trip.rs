//! Trip lifecycle: open, close with reconciliation, admin stop and delete.
//!
//! A bus cycles through no trip, an active trip and a finished trip. Closing
//! is a sequence of separate store calls, not a transaction; a failure part
//! way leaves whatever was last written.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::Trip;
use crate::notify::{Notifier, TripSummary};
use crate::scan::ScanSession;
use crate::session::Session;
use crate::store::records::TripClose;
use crate::store::Records;

/// Opens and closes trips.
#[derive(Debug, Clone)]
pub struct TripManager {
    records: Records,
    notifier: Arc<dyn Notifier>,
    timezone: Tz,
}

impl TripManager {
    /// Build a manager whose operating day follows `timezone`.
    #[must_use]
    pub fn new(records: Records, notifier: Arc<dyn Notifier>, timezone: Tz) -> Self {
        Self {
            records,
            notifier,
            timezone,
        }
    }

    /// Today's date in the organization timezone.
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    /// Open a trip for a bus.
    ///
    /// The check for an existing active trip and the create are separate
    /// calls; two devices racing can both succeed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BusNotFound`], [`Error::TripAlreadyActive`], or a
    /// store error.
    pub async fn start_trip(&self, bus_id: &str) -> Result<Trip> {
        self.records.require_bus(bus_id).await?;

        if let Some(active) = self
            .records
            .active_trips(bus_id, None, Some(1))
            .await?
            .into_iter()
            .next()
        {
            return Err(Error::TripAlreadyActive {
                bus_id: bus_id.to_string(),
                trip_id: active.id,
            });
        }

        let trip = self
            .records
            .create_trip(bus_id, self.today(), Utc::now())
            .await?;
        info!(bus_id, trip_id = %trip.id, date = %trip.date, "Trip started");
        Ok(trip)
    }

    /// The active trip of a bus on a date, if any.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn active_trip(&self, bus_id: &str, date: NaiveDate) -> Result<Option<Trip>> {
        Ok(self
            .records
            .active_trips(bus_id, Some(date), Some(1))
            .await?
            .into_iter()
            .next())
    }

    /// Close a trip: stop scanning, count, write back, notify.
    ///
    /// Pass the scan session that may be feeding this trip; it is stopped
    /// once the trip is known to be active, before counting. Notification
    /// failures are logged and do not fail the close.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveTrip`] if `trip_id` is not an active trip of
    /// the bus, or a store error.
    pub async fn end_trip(
        &self,
        bus_id: &str,
        trip_id: &str,
        scan: Option<&mut ScanSession>,
    ) -> Result<TripSummary> {
        let trip = self
            .records
            .trip(bus_id, trip_id)
            .await?
            .filter(Trip::is_active)
            .ok_or_else(|| Error::no_active_trip(bus_id))?;

        if let Some(scan) = scan {
            if let Err(e) = scan.stop().await {
                warn!(bus_id, trip_id, error = %e, "Scan source did not stop cleanly");
            }
        }

        let bus = self.records.require_bus(bus_id).await?;

        let total_students = count(self.records.students(bus_id).await?.len());
        let present_count = count(self.records.attendance(bus_id, trip_id).await?.len());
        if present_count > total_students {
            warn!(
                bus_id,
                trip_id,
                present_count,
                total_students,
                "More attendance records than students; absent count floored at zero"
            );
        }
        let absent_count = total_students.saturating_sub(present_count);

        self.records
            .close_trip(
                bus_id,
                trip_id,
                TripClose {
                    ended_at: Utc::now(),
                    total_students,
                    present_count,
                    absent_count,
                },
            )
            .await?;
        info!(
            bus_id,
            trip_id,
            total_students,
            present_count,
            absent_count,
            "Trip ended"
        );

        let summary = TripSummary {
            bus_id: bus.id,
            bus_name: bus.name,
            trip_id: trip.id,
            date: trip.date,
            total_students,
            present_count,
            absent_count,
        };
        if let Err(e) = self.notifier.send_trip_summary(&summary).await {
            warn!(
                notifier = self.notifier.name(),
                trip_id,
                error = %e,
                "Trip summary not delivered"
            );
        }
        Ok(summary)
    }

    /// Mark an active trip finished without counting or notifying.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] for supervisors,
    /// [`Error::NoActiveTrip`] if the trip is not active, or a store error.
    pub async fn force_finish(&self, session: &Session, bus_id: &str, trip_id: &str) -> Result<()> {
        session.require_manager("stopping trips")?;
        self.records
            .trip(bus_id, trip_id)
            .await?
            .filter(Trip::is_active)
            .ok_or_else(|| Error::no_active_trip(bus_id))?;

        self.records
            .mark_finished(bus_id, trip_id, Utc::now())
            .await?;
        info!(bus_id, trip_id, by = %session.email, "Trip stopped without reconciliation");
        Ok(())
    }

    /// Delete a trip and its attendance records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] for supervisors,
    /// [`Error::TripNotFound`], or a store error.
    pub async fn delete_trip(&self, session: &Session, bus_id: &str, trip_id: &str) -> Result<()> {
        session.require_manager("deleting trips")?;
        if self.records.trip(bus_id, trip_id).await?.is_none() {
            return Err(Error::TripNotFound(trip_id.to_string()));
        }

        let records = self.records.attendance(bus_id, trip_id).await?;
        for record in &records {
            self.records
                .delete_attendance(bus_id, trip_id, &record.id)
                .await?;
        }
        self.records.delete_trip(bus_id, trip_id).await?;

        info!(
            bus_id,
            trip_id,
            attendance_removed = records.len(),
            by = %session.email,
            "Trip deleted"
        );
        Ok(())
    }

    /// Trips of a bus in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BusNotFound`] or a store error.
    pub async fn list_trips(&self, bus_id: &str) -> Result<Vec<Trip>> {
        self.records.require_bus(bus_id).await?;
        self.records.trips(bus_id).await
    }
}

fn count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::ScanConfig;
    use crate::model::TripStatus;
    use crate::scan::{process_payload, LineSource, ScanContext};
    use crate::session::Role;
    use crate::testing::{seeded, session, Seeded};

    #[derive(Debug, Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<TripSummary>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send_trip_summary(&self, summary: &TripSummary) -> Result<()> {
            self.sent.lock().unwrap().push(summary.clone());
            Ok(())
        }
    }

    #[derive(Debug)]
    struct BrokenNotifier;

    #[async_trait]
    impl Notifier for BrokenNotifier {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn send_trip_summary(&self, _summary: &TripSummary) -> Result<()> {
            Err(Error::Notify("smtp down".to_string()))
        }
    }

    async fn setup(names: &[&str]) -> (Seeded, TripManager, Arc<RecordingNotifier>) {
        let seeded = seeded(names).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let manager = TripManager::new(
            seeded.records.clone(),
            notifier.clone(),
            chrono_tz::Asia::Qatar,
        );
        (seeded, manager, notifier)
    }

    async fn scan(seeded: &Seeded, trip: &Trip, payload: &str) {
        let context = ScanContext::new(seeded.records.clone(), &seeded.bus.id, &trip.id);
        process_payload(&context, payload).await;
    }

    #[tokio::test]
    async fn test_start_trip_creates_active_trip_for_today() {
        let (seeded, manager, _) = setup(&["Sara"]).await;
        let trip = manager.start_trip(&seeded.bus.id).await.unwrap();

        assert_eq!(trip.status, TripStatus::Active);
        assert_eq!(trip.date, manager.today());
        assert_eq!(
            (trip.total_students, trip.present_count, trip.absent_count),
            (0, 0, 0)
        );
        assert_eq!(
            manager
                .active_trip(&seeded.bus.id, trip.date)
                .await
                .unwrap(),
            Some(trip)
        );
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let (seeded, manager, _) = setup(&["Sara"]).await;
        let first = manager.start_trip(&seeded.bus.id).await.unwrap();

        let err = manager.start_trip(&seeded.bus.id).await.unwrap_err();
        match err {
            Error::TripAlreadyActive { trip_id, .. } => assert_eq!(trip_id, first.id),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(manager.list_trips(&seeded.bus.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_start_for_unknown_bus() {
        let (_, manager, _) = setup(&[]).await;
        let err = manager.start_trip("ghost").await.unwrap_err();
        assert!(matches!(err, Error::BusNotFound(_)));
    }

    #[tokio::test]
    async fn test_end_trip_reconciles_one_of_three() {
        let (seeded, manager, notifier) = setup(&["S1", "S2", "S3"]).await;
        let trip = manager.start_trip(&seeded.bus.id).await.unwrap();
        scan(&seeded, &trip, &seeded.students[0].id).await;

        let summary = manager
            .end_trip(&seeded.bus.id, &trip.id, None)
            .await
            .unwrap();
        assert_eq!(summary.present_count, 1);
        assert_eq!(summary.absent_count, 2);
        assert_eq!(summary.total_students, 3);
        assert_eq!(summary.bus_name, "Bus 12");

        let stored = seeded
            .records
            .trip(&seeded.bus.id, &trip.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TripStatus::Finished);
        assert!(stored.ended_at.is_some());
        assert_eq!(
            stored.present_count + stored.absent_count,
            stored.total_students
        );
        assert_eq!(
            (stored.total_students, stored.present_count, stored.absent_count),
            (3, 1, 2)
        );

        assert_eq!(notifier.sent.lock().unwrap().clone(), vec![summary]);
    }

    #[tokio::test]
    async fn test_end_trip_with_no_scans() {
        let (seeded, manager, _) = setup(&["S1", "S2", "S3", "S4"]).await;
        let trip = manager.start_trip(&seeded.bus.id).await.unwrap();

        let summary = manager
            .end_trip(&seeded.bus.id, &trip.id, None)
            .await
            .unwrap();
        assert_eq!(summary.present_count, 0);
        assert_eq!(summary.absent_count, 4);
    }

    #[tokio::test]
    async fn test_end_trip_twice() {
        let (seeded, manager, notifier) = setup(&["S1"]).await;
        let trip = manager.start_trip(&seeded.bus.id).await.unwrap();
        manager
            .end_trip(&seeded.bus.id, &trip.id, None)
            .await
            .unwrap();

        let err = manager
            .end_trip(&seeded.bus.id, &trip.id, None)
            .await
            .unwrap_err();
        assert!(err.is_no_active_trip());
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_end_unknown_trip() {
        let (seeded, manager, _) = setup(&["S1"]).await;
        let err = manager
            .end_trip(&seeded.bus.id, "missing", None)
            .await
            .unwrap_err();
        assert!(err.is_no_active_trip());
    }

    #[tokio::test]
    async fn test_new_trip_after_close() {
        let (seeded, manager, _) = setup(&["S1"]).await;
        let first = manager.start_trip(&seeded.bus.id).await.unwrap();
        manager
            .end_trip(&seeded.bus.id, &first.id, None)
            .await
            .unwrap();

        let second = manager.start_trip(&seeded.bus.id).await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_notifier_failure_is_swallowed() {
        let seeded = seeded(&["S1", "S2"]).await;
        let manager = TripManager::new(
            seeded.records.clone(),
            Arc::new(BrokenNotifier),
            chrono_tz::Asia::Qatar,
        );
        let trip = manager.start_trip(&seeded.bus.id).await.unwrap();

        let summary = manager
            .end_trip(&seeded.bus.id, &trip.id, None)
            .await
            .unwrap();
        assert_eq!(summary.absent_count, 2);

        let stored = seeded
            .records
            .trip(&seeded.bus.id, &trip.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TripStatus::Finished);
    }

    #[tokio::test]
    async fn test_store_failure_leaves_trip_active() {
        let (seeded, manager, notifier) = setup(&["S1"]).await;
        let trip = manager.start_trip(&seeded.bus.id).await.unwrap();

        seeded.store.fail_writes(true);
        let err = manager
            .end_trip(&seeded.bus.id, &trip.id, None)
            .await
            .unwrap_err();
        assert!(err.is_persistence_error());
        seeded.store.fail_writes(false);

        let stored = seeded
            .records
            .trip(&seeded.bus.id, &trip.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_active());
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_removed_student_floors_absent_at_zero() {
        let (seeded, manager, _) = setup(&["S1", "S2"]).await;
        let trip = manager.start_trip(&seeded.bus.id).await.unwrap();
        scan(&seeded, &trip, &seeded.students[0].id).await;
        scan(&seeded, &trip, &seeded.students[1].id).await;
        seeded
            .records
            .delete_student(&seeded.bus.id, &seeded.students[1].id)
            .await
            .unwrap();

        let summary = manager
            .end_trip(&seeded.bus.id, &trip.id, None)
            .await
            .unwrap();
        assert_eq!(summary.total_students, 1);
        assert_eq!(summary.present_count, 2);
        assert_eq!(summary.absent_count, 0);
    }

    #[tokio::test]
    async fn test_end_trip_stops_scanning() {
        let (seeded, manager, _) = setup(&["S1"]).await;
        let trip = manager.start_trip(&seeded.bus.id).await.unwrap();

        let (_client, server) = tokio::io::duplex(64);
        let mut server = Some(server);
        let source = LineSource::new(move || server.take().unwrap_or_else(|| tokio::io::duplex(8).1));
        let (tx, _rx) = mpsc::channel(8);
        let mut session = ScanSession::new(
            Box::new(source),
            seeded.records.clone(),
            &ScanConfig::default(),
            tx,
        );
        session.start(&seeded.bus.id, &trip.id).await.unwrap();
        assert!(session.is_running());

        manager
            .end_trip(&seeded.bus.id, &trip.id, Some(&mut session))
            .await
            .unwrap();
        assert!(!session.is_running());

        let err = session.start(&seeded.bus.id, &trip.id).await.unwrap_err();
        assert!(err.is_no_active_trip());
    }

    #[tokio::test]
    async fn test_rejected_end_keeps_scanning() {
        let (seeded, manager, notifier) = setup(&["S1"]).await;
        let trip = manager.start_trip(&seeded.bus.id).await.unwrap();

        let (_client, server) = tokio::io::duplex(64);
        let mut server = Some(server);
        let source = LineSource::new(move || server.take().unwrap_or_else(|| tokio::io::duplex(8).1));
        let (tx, _rx) = mpsc::channel(8);
        let mut session = ScanSession::new(
            Box::new(source),
            seeded.records.clone(),
            &ScanConfig::default(),
            tx,
        );
        session.start(&seeded.bus.id, &trip.id).await.unwrap();

        let err = manager
            .end_trip(&seeded.bus.id, "wrong-trip", Some(&mut session))
            .await
            .unwrap_err();
        assert!(err.is_no_active_trip());
        assert!(session.is_running());
        assert_eq!(session.trip_id(), Some(trip.id.as_str()));
        assert!(notifier.sent.lock().unwrap().is_empty());

        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_force_finish_skips_reconciliation() {
        let (seeded, manager, notifier) = setup(&["S1", "S2"]).await;
        let trip = manager.start_trip(&seeded.bus.id).await.unwrap();
        scan(&seeded, &trip, &seeded.students[0].id).await;

        let err = manager
            .force_finish(&session(Role::Supervisor), &seeded.bus.id, &trip.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized { .. }));

        manager
            .force_finish(&session(Role::Manager), &seeded.bus.id, &trip.id)
            .await
            .unwrap();

        let stored = seeded
            .records
            .trip(&seeded.bus.id, &trip.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TripStatus::Finished);
        assert_eq!(stored.present_count, 0);
        assert_eq!(stored.total_students, 0);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_trip_removes_attendance() {
        let (seeded, manager, _) = setup(&["S1"]).await;
        let trip = manager.start_trip(&seeded.bus.id).await.unwrap();
        scan(&seeded, &trip, &seeded.students[0].id).await;

        assert!(manager
            .delete_trip(&session(Role::Supervisor), &seeded.bus.id, &trip.id)
            .await
            .is_err());

        manager
            .delete_trip(&session(Role::Manager), &seeded.bus.id, &trip.id)
            .await
            .unwrap();
        assert!(manager.list_trips(&seeded.bus.id).await.unwrap().is_empty());
        assert!(seeded
            .records
            .attendance(&seeded.bus.id, &trip.id)
            .await
            .unwrap()
            .is_empty());

        let err = manager
            .delete_trip(&session(Role::Manager), &seeded.bus.id, &trip.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TripNotFound(_)));
    }
}
