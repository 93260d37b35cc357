//! Shared fixtures and collaborator fakes for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::db::store::now;
use crate::dispatch::{DispatchError, DispatchRequest, ResultDispatcher};
use crate::models::*;
use crate::scheduling::{
    ExternalAppointment, ExternalAppointmentPatch, ExternalPackage, GatewayError,
    SchedulingGateway,
};

pub fn make_appointment(external_id: i64) -> Appointment {
    Appointment {
        id: Uuid::new_v4(),
        external_id,
        status: AppointmentStatus::Pending,
        organization_id: Some("org-1".into()),
        package_code: None,
        barcode: Some(format!("KIT{external_id:06}")),
        latest_result: ResultType::Pending,
        scheduled_at: Some(
            NaiveDate::from_ymd_opt(2026, 8, 20)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
        ),
        deadline: None,
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
        email: Some("ada@example.com".into()),
        phone: None,
        date_of_birth: NaiveDate::from_ymd_opt(1990, 12, 10),
        canceled: false,
        created_at: now(),
        updated_at: now(),
    }
}

pub fn make_result(appt: &Appointment) -> TestResult {
    TestResult {
        id: Uuid::new_v4(),
        appointment_id: appt.id,
        barcode: appt.barcode.clone(),
        result: ResultType::Pending,
        waiting_result: true,
        recollected: false,
        run_number: 1,
        re_collect_number: 1,
        display_in_result: true,
        confirmed: false,
        previous_result: None,
        linked_barcodes: Vec::new(),
        organization_id: appt.organization_id.clone(),
        admin_id: None,
        result_analysis: Vec::new(),
        result_date: None,
        first_name: appt.first_name.clone(),
        last_name: appt.last_name.clone(),
        date_of_birth: appt.date_of_birth,
        test_type: None,
        created_at: now(),
        updated_at: now(),
    }
}

// ─── Dispatcher fake ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeDispatcher {
    pub sent: Mutex<Vec<DispatchRequest>>,
    pub fail: bool,
}

impl FakeDispatcher {
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl ResultDispatcher for FakeDispatcher {
    async fn dispatch(&self, req: &DispatchRequest) -> Result<(), DispatchError> {
        if self.fail {
            return Err(DispatchError::Status(503));
        }
        self.sent.lock().unwrap().push(req.clone());
        Ok(())
    }
}

// ─── Scheduling gateway fake ──────────────────────────────────────────────

#[derive(Default)]
pub struct FakeGateway {
    pub appointments: Mutex<HashMap<i64, ExternalAppointment>>,
    pub packages: Vec<ExternalPackage>,
    /// Simulates an upstream timeout on every fetch.
    pub time_out: bool,
    pub updates: Mutex<Vec<(i64, ExternalAppointmentPatch)>>,
}

impl FakeGateway {
    pub fn with_appointment(appt: ExternalAppointment) -> Self {
        let gateway = Self::default();
        gateway.appointments.lock().unwrap().insert(appt.id, appt);
        gateway
    }

    pub fn update_count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }
}

impl SchedulingGateway for FakeGateway {
    async fn get_appointment(
        &self,
        external_id: i64,
    ) -> Result<Option<ExternalAppointment>, GatewayError> {
        if self.time_out {
            return Err(GatewayError::Timeout);
        }
        Ok(self.appointments.lock().unwrap().get(&external_id).cloned())
    }

    async fn update_appointment(
        &self,
        external_id: i64,
        patch: &ExternalAppointmentPatch,
    ) -> Result<ExternalAppointment, GatewayError> {
        let mut appts = self.appointments.lock().unwrap();
        let appt = appts
            .get_mut(&external_id)
            .ok_or(GatewayError::Status(404))?;
        if let Some(barcode) = &patch.barcode {
            appt.barcode = Some(barcode.clone());
        }
        if let Some(org) = &patch.organization_id {
            appt.organization_id = Some(org.clone());
        }
        self.updates
            .lock()
            .unwrap()
            .push((external_id, patch.clone()));
        Ok(appt.clone())
    }

    async fn get_packages(&self) -> Result<Vec<ExternalPackage>, GatewayError> {
        if self.time_out {
            return Err(GatewayError::Timeout);
        }
        Ok(self.packages.clone())
    }
}

/// An external booking shaped like the scheduling service returns it.
pub fn make_external(external_id: i64) -> ExternalAppointment {
    ExternalAppointment {
        id: external_id,
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
        email: Some("ada@example.com".into()),
        phone: None,
        canceled: false,
        datetime: Some("2026-08-20T09:30:00-0500".into()),
        barcode: Some(format!("KIT{external_id:06}")),
        organization_id: Some("org-1".into()),
        certificate: None,
        date_of_birth: Some("1990-12-10".into()),
        appointment_type: Some("PCR".into()),
    }
}
