//! Downstream report delivery collaborator.
//!
//! Rendering and the actual email/fax transports live in a separate delivery
//! service; this module only requests a send. The action state machine hands
//! a `DispatchRequest` here after finalizing a result.

use std::future::Future;

use serde::Serialize;
use uuid::Uuid;

use crate::config;
use crate::models::ResultType;

/// A request to deliver a finalized result to the patient.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub result_id: Uuid,
    pub appointment_id: Uuid,
    pub barcode: Option<String>,
    pub result: ResultType,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("delivery service timed out")]
    Timeout,
    #[error("delivery service returned status {0}")]
    Status(u16),
    #[error("delivery request failed: {0}")]
    Http(String),
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DispatchError::Timeout
        } else {
            DispatchError::Http(err.to_string())
        }
    }
}

/// Seam for requesting report delivery. Faked in tests. Futures are
/// `Send` so implementations can be driven from axum handlers.
pub trait ResultDispatcher {
    fn dispatch(
        &self,
        req: &DispatchRequest,
    ) -> impl Future<Output = Result<(), DispatchError>> + Send;
}

/// Posts dispatch requests to the delivery service over HTTP.
pub struct HttpDispatcher {
    http: reqwest::Client,
    base_url: String,
}

impl HttpDispatcher {
    pub fn from_env() -> Self {
        let http = reqwest::Client::builder()
            .timeout(config::upstream_timeout())
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: config::dispatch_base_url(),
        }
    }
}

impl ResultDispatcher for HttpDispatcher {
    async fn dispatch(&self, req: &DispatchRequest) -> Result<(), DispatchError> {
        let url = format!("{}/reports", self.base_url.trim_end_matches('/'));
        let response = self.http.post(url).json(req).send().await?;
        if !response.status().is_success() {
            return Err(DispatchError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_camel_case() {
        let req = DispatchRequest {
            result_id: Uuid::nil(),
            appointment_id: Uuid::nil(),
            barcode: Some("KIT000001".into()),
            result: ResultType::Negative,
            email: Some("ada@example.com".into()),
            phone: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("resultId").is_some());
        assert!(json.get("appointmentId").is_some());
        assert_eq!(json["barcode"], "KIT000001");
    }
}
