//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::model::{Bus, Student};
use crate::session::{Role, Session};
use crate::store::records::NewStudent;
use crate::store::{Document, DocumentStore, Query, Records, SqliteStore};

/// In-memory store whose reads or writes can be made to fail.
#[derive(Debug)]
pub(crate) struct FlakyStore {
    inner: SqliteStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().expect("failed to create test store"),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self, flag: &AtomicBool) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            Err(Error::persistence("injected store failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn create(&self, collection: &str, fields: Map<String, Value>) -> Result<String> {
        self.check(&self.fail_writes)?;
        self.inner.create(collection, fields).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.check(&self.fail_reads)?;
        self.inner.get(collection, id).await
    }

    async fn list(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        self.check(&self.fail_reads)?;
        self.inner.list(collection, query).await
    }

    async fn update(&self, collection: &str, id: &str, fields: Map<String, Value>) -> Result<()> {
        self.check(&self.fail_writes)?;
        self.inner.update(collection, id, fields).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        self.check(&self.fail_writes)?;
        self.inner.delete(collection, id).await
    }
}

/// A bus with the named students on a fresh flaky store.
pub(crate) struct Seeded {
    pub store: Arc<FlakyStore>,
    pub records: Records,
    pub bus: Bus,
    pub students: Vec<Student>,
}

pub(crate) async fn seeded(student_names: &[&str]) -> Seeded {
    let store = Arc::new(FlakyStore::new());
    let records = Records::new(store.clone());
    let bus = records
        .create_bus("Bus 12", Some("Huda"))
        .await
        .expect("failed to create test bus");

    let mut students = Vec::new();
    for (i, name) in student_names.iter().enumerate() {
        let student = records
            .add_student(
                &bus.id,
                NewStudent {
                    name: (*name).to_string(),
                    national_id: format!("2840000000{i}"),
                    area: "Al Wakra".to_string(),
                },
            )
            .await
            .expect("failed to add test student");
        students.push(student);
    }

    Seeded {
        store,
        records,
        bus,
        students,
    }
}

pub(crate) fn session(role: Role) -> Session {
    Session {
        email: format!("{role}@school.com"),
        role,
        logged_in_at: Utc::now(),
    }
}
