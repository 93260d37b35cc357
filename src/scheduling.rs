//! Gateway to the external scheduling service (system of record for
//! bookings).
//!
//! The write path is a two-phase protocol: read the booking, compute a patch
//! from missing fields only, write the patch back. The service offers no
//! optimistic-lock token, so the patch must never assume the record is
//! unchanged between read and write.

use std::future::Future;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config;

// ─── Wire types ───────────────────────────────────────────────────────────

/// The slice of the external booking record that reconciliation reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAppointment {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub canceled: bool,
    /// Booking datetime as the service formats it, e.g.
    /// `2026-08-20T09:30:00-0500`.
    pub datetime: Option<String>,
    pub barcode: Option<String>,
    pub organization_id: Option<String>,
    /// Coupon/certificate code used at booking time.
    pub certificate: Option<String>,
    pub date_of_birth: Option<String>,
    #[serde(rename = "type")]
    pub appointment_type: Option<String>,
}

impl ExternalAppointment {
    /// Booking time with the service's offset stripped. The service emits a
    /// non-RFC3339 offset (`-0500`), so parse both forms.
    pub fn scheduled_at(&self) -> Option<NaiveDateTime> {
        let raw = self.datetime.as_deref()?;
        chrono::DateTime::parse_from_rfc3339(raw)
            .or_else(|_| chrono::DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
            .map(|dt| dt.naive_local())
            .ok()
    }

    pub fn birth_date(&self) -> Option<chrono::NaiveDate> {
        let raw = self.date_of_birth.as_deref()?;
        chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
    }
}

/// Fields pushed back onto the external booking during backfill. Only
/// fields the booking is missing are ever set.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAppointmentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

impl ExternalAppointmentPatch {
    pub fn is_empty(&self) -> bool {
        self.barcode.is_none() && self.organization_id.is_none()
    }
}

/// Package/certificate record as the scheduling service exposes it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalPackage {
    pub certificate: String,
    pub organization_id: Option<String>,
    pub name: Option<String>,
}

// ─── Errors ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("scheduling service timed out")]
    Timeout,
    #[error("scheduling service returned status {0}")]
    Status(u16),
    #[error("scheduling service request failed: {0}")]
    Http(String),
    #[error("could not decode scheduling response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Http(err.to_string())
        }
    }
}

// ─── Gateway trait ────────────────────────────────────────────────────────

/// Narrow read/update surface over the scheduling service. Faked in tests.
/// Futures are `Send` so implementations can be driven from axum handlers.
pub trait SchedulingGateway {
    /// Fetch a booking. `None` when the service does not know the id;
    /// external events can reference stale or deleted bookings.
    fn get_appointment(
        &self,
        external_id: i64,
    ) -> impl Future<Output = Result<Option<ExternalAppointment>, GatewayError>> + Send;

    fn update_appointment(
        &self,
        external_id: i64,
        patch: &ExternalAppointmentPatch,
    ) -> impl Future<Output = Result<ExternalAppointment, GatewayError>> + Send;

    fn get_packages(&self) -> impl Future<Output = Result<Vec<ExternalPackage>, GatewayError>> + Send;
}

// ─── Production client ────────────────────────────────────────────────────

/// reqwest-backed scheduling client with basic auth and a per-request
/// timeout.
pub struct SchedulingClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
    api_key: String,
}

impl SchedulingClient {
    pub fn from_env() -> Self {
        Self::new(
            config::scheduling_base_url(),
            config::scheduling_user(),
            config::scheduling_api_key(),
            config::upstream_timeout(),
        )
    }

    pub fn new(base_url: String, user: String, api_key: String, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url,
            user,
            api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

impl SchedulingGateway for SchedulingClient {
    async fn get_appointment(
        &self,
        external_id: i64,
    ) -> Result<Option<ExternalAppointment>, GatewayError> {
        let response = self
            .http
            .get(self.url(&format!("/appointments/{external_id}")))
            .basic_auth(&self.user, Some(&self.api_key))
            .send()
            .await?;

        match response.status().as_u16() {
            200 => Ok(Some(response.json().await?)),
            404 => Ok(None),
            status => Err(GatewayError::Status(status)),
        }
    }

    async fn update_appointment(
        &self,
        external_id: i64,
        patch: &ExternalAppointmentPatch,
    ) -> Result<ExternalAppointment, GatewayError> {
        let response = self
            .http
            .put(self.url(&format!("/appointments/{external_id}")))
            .basic_auth(&self.user, Some(&self.api_key))
            .json(patch)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GatewayError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }

    async fn get_packages(&self) -> Result<Vec<ExternalPackage>, GatewayError> {
        let response = self
            .http
            .get(self.url("/certificates"))
            .basic_auth(&self.user, Some(&self.api_key))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GatewayError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }
}
