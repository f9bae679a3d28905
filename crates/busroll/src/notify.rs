//! Trip summary notifications.
//!
//! When a trip closes, a summary goes out through a [`Notifier`]. Delivery is
//! best effort: the trip manager logs a failure and carries on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::NotifyConfig;
use crate::error::{Error, Result};

/// What a closed trip reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripSummary {
    /// Bus the trip belongs to.
    pub bus_id: String,
    /// Display name of the bus.
    pub bus_name: String,
    /// The closed trip.
    pub trip_id: String,
    /// Operating day.
    pub date: NaiveDate,
    /// Students on the bus at close.
    pub total_students: u32,
    /// Students with an attendance record.
    pub present_count: u32,
    /// Students without one.
    pub absent_count: u32,
}

impl TripSummary {
    /// Subject line for the summary message.
    #[must_use]
    pub fn subject(&self) -> String {
        format!("Trip report: {}", self.bus_name)
    }

    /// HTML body for the summary message.
    #[must_use]
    pub fn html(&self) -> String {
        format!(
            "<h2>Trip report</h2>\
             <p><strong>Bus:</strong> {}</p>\
             <p><strong>Date:</strong> {}</p>\
             <p><strong>Present:</strong> {}</p>\
             <p><strong>Absent:</strong> {}</p>",
            escape_html(&self.bus_name),
            self.date,
            self.present_count,
            self.absent_count,
        )
    }
}

/// Delivers trip summaries.
#[async_trait]
pub trait Notifier: Send + Sync + std::fmt::Debug {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Send one summary.
    async fn send_trip_summary(&self, summary: &TripSummary) -> Result<()>;
}

/// Writes summaries to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send_trip_summary(&self, summary: &TripSummary) -> Result<()> {
        info!(
            bus_id = %summary.bus_id,
            trip_id = %summary.trip_id,
            present = summary.present_count,
            absent = summary.absent_count,
            "{}",
            summary.subject()
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct EmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: String,
    html: String,
}

/// Sends summaries through an HTTP email API taking `{from, to, subject, html}`.
#[derive(Debug, Clone)]
pub struct EmailNotifier {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    from: String,
    to: String,
}

impl EmailNotifier {
    /// Build a notifier for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            from: from.into(),
            to: to.into(),
        })
    }

    fn request_body(&self, summary: &TripSummary) -> EmailRequest<'_> {
        EmailRequest {
            from: &self.from,
            to: &self.to,
            subject: summary.subject(),
            html: summary.html(),
        }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send_trip_summary(&self, summary: &TripSummary) -> Result<()> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&self.request_body(summary));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notify(format!(
                "email API returned {status}: {}",
                body.trim()
            )));
        }

        debug!(trip_id = %summary.trip_id, to = %self.to, "Trip summary emailed");
        Ok(())
    }
}

/// Pick the notifier the configuration asks for.
///
/// # Errors
///
/// Returns an error if the email client cannot be built.
pub fn from_config(config: &NotifyConfig, timeout: Duration) -> Result<Arc<dyn Notifier>> {
    match &config.endpoint {
        Some(endpoint) => Ok(Arc::new(EmailNotifier::new(
            endpoint.clone(),
            config.api_key.clone(),
            config.from.clone(),
            config.to.clone(),
            timeout,
        )?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
