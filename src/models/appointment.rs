use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{AppointmentStatus, ResultType};

/// Internal record of one scheduled diagnostic test.
///
/// Exactly one non-canceled appointment exists per external scheduling id.
/// Rows are never physically deleted; cancellation is a status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    /// Id of the booking in the external scheduling service.
    pub external_id: i64,
    pub status: AppointmentStatus,
    pub organization_id: Option<String>,
    /// Coupon/certificate code the booking was made with, if any.
    pub package_code: Option<String>,
    pub barcode: Option<String>,
    /// Summary of the most recently resolved result.
    pub latest_result: ResultType,
    pub scheduled_at: Option<NaiveDateTime>,
    pub deadline: Option<NaiveDateTime>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub canceled: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Named-property patch for an appointment. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct AppointmentPatch {
    pub status: Option<AppointmentStatus>,
    pub organization_id: Option<String>,
    pub barcode: Option<String>,
    pub latest_result: Option<ResultType>,
    pub canceled: Option<bool>,
    pub scheduled_at: Option<NaiveDateTime>,
    pub deadline: Option<NaiveDateTime>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
}

impl AppointmentPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.organization_id.is_none()
            && self.barcode.is_none()
            && self.latest_result.is_none()
            && self.canceled.is_none()
            && self.scheduled_at.is_none()
            && self.deadline.is_none()
            && self.first_name.is_none()
            && self.last_name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.date_of_birth.is_none()
    }
}
