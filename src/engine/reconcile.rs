//! Webhook-driven reconciliation against the external scheduling service.
//!
//! The external service is the system of record for bookings; each event
//! re-derives internal state from the external record's current values
//! rather than diffing against an expected prior state, so a replayed or
//! out-of-order delivery converges on the same rows. There is no
//! per-appointment lock: the terminal-status guard is the only protection
//! against a late event racing a reported result.

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::barcode::next_barcode;
use crate::config;
use crate::db::store::{now, RecordStore};
use crate::engine::EngineError;
use crate::models::{
    ActivityAction, ActivityEntry, Appointment, AppointmentPatch, AppointmentStatus, Package,
    ResultType, TestResult, TestResultPatch,
};
use crate::scheduling::{ExternalAppointment, ExternalAppointmentPatch, SchedulingGateway};

/// Inbound webhook payload. The scheduling service sends the booking id
/// under either `id` or `acuityID` depending on the event source.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncEvent {
    #[serde(rename = "id", alias = "acuityID")]
    pub external_id: i64,
    #[serde(default)]
    pub action: String,
    #[serde(rename = "calendarID", default)]
    pub calendar_id: i64,
    #[serde(rename = "appointmentTypeID", default)]
    pub appointment_type_id: i64,
    #[serde(rename = "returnData", default)]
    pub return_data: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created,
    Updated,
    Canceled,
    /// The appointment is in a terminal status; the event was ignored.
    AlreadyTerminal,
    /// The external id could not be resolved; soft skip, not an error.
    InvalidExternalId,
}

/// Process one sync event end to end. Safe to call more than once for the
/// same delivery.
pub async fn reconcile_event<G: SchedulingGateway>(
    store: &RecordStore,
    gateway: &G,
    event: &SyncEvent,
) -> Result<ReconcileOutcome, EngineError> {
    let external_id = event.external_id;

    // A fetch failure (including timeout) means the booking's existence
    // cannot be confirmed, which is handled the same as a stale id.
    let external = match gateway.get_appointment(external_id).await {
        Ok(Some(appt)) => appt,
        Ok(None) => {
            info!(external_id, action = %event.action, "external id not resolvable");
            return Ok(ReconcileOutcome::InvalidExternalId);
        }
        Err(e) => {
            warn!(external_id, error = %e, "scheduling fetch failed, skipping event");
            return Ok(ReconcileOutcome::InvalidExternalId);
        }
    };

    let external = backfill_external(store, gateway, external).await?;

    match store.find_appointment_by_external_id(external_id)? {
        None => create_from_external(store, &external),
        Some(appt) if appt.status.is_terminal() => {
            info!(
                external_id,
                appointment_id = %appt.id,
                status = appt.status.as_str(),
                "appointment is terminal, event ignored"
            );
            Ok(ReconcileOutcome::AlreadyTerminal)
        }
        Some(appt) => update_from_external(store, &appt, &external),
    }
}

// ─── Missing-field backfill ───────────────────────────────────────────────

/// Push barcode and organization back onto the external booking when it
/// lacks them, so systems reading the scheduling service directly stay
/// consistent. Returns the booking with the backfilled values applied.
async fn backfill_external<G: SchedulingGateway>(
    store: &RecordStore,
    gateway: &G,
    mut external: ExternalAppointment,
) -> Result<ExternalAppointment, EngineError> {
    let mut patch = ExternalAppointmentPatch::default();

    if external.barcode.as_deref().unwrap_or("").is_empty() {
        patch.barcode = Some(next_barcode(store, &config::barcode_prefix())?);
    }

    if external.organization_id.as_deref().unwrap_or("").is_empty() {
        if let Some(certificate) = external.certificate.clone().filter(|c| !c.is_empty()) {
            match resolve_organization(store, gateway, &certificate).await? {
                Some(org) => patch.organization_id = Some(org),
                None => {
                    warn!(
                        external_id = external.id,
                        certificate, "no organization resolvable for certificate"
                    );
                }
            }
        }
    }

    if patch.is_empty() {
        return Ok(external);
    }

    // No optimistic-lock token exists; the patch only ever sets fields the
    // record was missing, so a concurrent write cannot be clobbered.
    match gateway.update_appointment(external.id, &patch).await {
        Ok(updated) => Ok(updated),
        Err(e) => {
            warn!(external_id = external.id, error = %e, "external write-back failed");
            if let Some(barcode) = patch.barcode {
                external.barcode = Some(barcode);
            }
            if let Some(org) = patch.organization_id {
                external.organization_id = Some(org);
            }
            Ok(external)
        }
    }
}

/// Map a certificate code to its organization, refreshing the local
/// package cache from the scheduling service on a miss.
async fn resolve_organization<G: SchedulingGateway>(
    store: &RecordStore,
    gateway: &G,
    certificate: &str,
) -> Result<Option<String>, EngineError> {
    if let Some(pkg) = store.get_package(certificate)? {
        return Ok(pkg.organization_id);
    }

    match gateway.get_packages().await {
        Ok(packages) => {
            for pkg in packages {
                store.upsert_package(&Package {
                    code: pkg.certificate,
                    organization_id: pkg.organization_id,
                    name: pkg.name,
                })?;
            }
        }
        Err(e) => {
            warn!(error = %e, "package refresh failed");
            return Ok(None);
        }
    }

    Ok(store.get_package(certificate)?.and_then(|p| p.organization_id))
}

// ─── Create path ──────────────────────────────────────────────────────────

/// First event for an external id creates the appointment and its waiting
/// result. Failures here are logged, never propagated: rejecting the
/// webhook would only trigger an upstream retry storm, and the next event
/// self-heals whatever was half-written.
fn create_from_external(
    store: &RecordStore,
    external: &ExternalAppointment,
) -> Result<ReconcileOutcome, EngineError> {
    let appt = Appointment {
        id: Uuid::new_v4(),
        external_id: external.id,
        status: AppointmentStatus::Pending,
        organization_id: external.organization_id.clone(),
        package_code: external.certificate.clone(),
        barcode: external.barcode.clone(),
        latest_result: ResultType::Pending,
        scheduled_at: external.scheduled_at(),
        deadline: None,
        first_name: external.first_name.clone(),
        last_name: external.last_name.clone(),
        email: external.email.clone(),
        phone: external.phone.clone(),
        date_of_birth: external.birth_date(),
        canceled: external.canceled,
        created_at: now(),
        updated_at: now(),
    };

    if let Err(e) = try_create(store, &appt, external) {
        warn!(
            external_id = external.id,
            appointment_id = %appt.id,
            error = %e,
            "appointment creation failed, event still acknowledged"
        );
    } else {
        info!(external_id = external.id, appointment_id = %appt.id, "appointment created");
    }
    Ok(ReconcileOutcome::Created)
}

fn try_create(
    store: &RecordStore,
    appt: &Appointment,
    external: &ExternalAppointment,
) -> Result<(), EngineError> {
    store.add_appointment(appt)?;
    store.append_activity(&ActivityEntry {
        id: Uuid::new_v4(),
        entity_id: appt.id.to_string(),
        action: ActivityAction::AppointmentCreated,
        actor: None,
        current_data: json!({}),
        new_data: json!({
            "externalId": appt.external_id,
            "barcode": appt.barcode,
            "organizationId": appt.organization_id,
        }),
        created_at: now(),
    })?;

    let result = fresh_waiting_result(appt, external);
    store.add_result(&result)?;
    store.append_activity(&ActivityEntry {
        id: Uuid::new_v4(),
        entity_id: result.id.to_string(),
        action: ActivityAction::ResultCreated,
        actor: None,
        current_data: json!({}),
        new_data: json!({ "appointmentId": appt.id, "barcode": result.barcode }),
        created_at: now(),
    })?;
    Ok(())
}

fn fresh_waiting_result(appt: &Appointment, external: &ExternalAppointment) -> TestResult {
    TestResult {
        id: Uuid::new_v4(),
        appointment_id: appt.id,
        barcode: external
            .barcode
            .clone()
            .filter(|b| !b.is_empty())
            .or_else(|| appt.barcode.clone()),
        result: ResultType::Pending,
        waiting_result: true,
        recollected: false,
        run_number: 1,
        re_collect_number: 1,
        display_in_result: true,
        confirmed: false,
        previous_result: None,
        linked_barcodes: Vec::new(),
        organization_id: external
            .organization_id
            .clone()
            .filter(|o| !o.is_empty())
            .or_else(|| appt.organization_id.clone()),
        admin_id: None,
        result_analysis: Vec::new(),
        result_date: None,
        first_name: external.first_name.clone(),
        last_name: external.last_name.clone(),
        date_of_birth: external.birth_date(),
        test_type: external.appointment_type.clone(),
        created_at: now(),
        updated_at: now(),
    }
}

// ─── Update path ──────────────────────────────────────────────────────────

fn update_from_external(
    store: &RecordStore,
    appt: &Appointment,
    external: &ExternalAppointment,
) -> Result<ReconcileOutcome, EngineError> {
    let canceling = external.canceled && !appt.canceled;

    let patch = AppointmentPatch {
        status: canceling.then_some(AppointmentStatus::Canceled),
        canceled: canceling.then_some(true),
        // External value wins when present.
        barcode: external.barcode.clone().filter(|b| !b.is_empty()),
        organization_id: external.organization_id.clone().filter(|o| !o.is_empty()),
        scheduled_at: external.scheduled_at(),
        first_name: Some(external.first_name.clone()).filter(|n| !n.is_empty()),
        last_name: Some(external.last_name.clone()).filter(|n| !n.is_empty()),
        email: external.email.clone(),
        phone: external.phone.clone(),
        date_of_birth: external.birth_date(),
        ..Default::default()
    };
    store.update_appointment(&appt.id, &patch)?;

    if canceling {
        // The booking no longer exists upstream; the waiting row has
        // nothing left to wait for.
        if let Some(waiting) = store.get_waiting_result(&appt.id)? {
            store.delete_result(&waiting.id)?;
            store.append_activity(&ActivityEntry {
                id: Uuid::new_v4(),
                entity_id: waiting.id.to_string(),
                action: ActivityAction::ResultDeleted,
                actor: None,
                current_data: json!({ "waitingResult": true }),
                new_data: json!({}),
                created_at: now(),
            })?;
        }
        store.append_activity(&ActivityEntry {
            id: Uuid::new_v4(),
            entity_id: appt.id.to_string(),
            action: ActivityAction::AppointmentCanceled,
            actor: None,
            current_data: json!({ "status": appt.status.as_str() }),
            new_data: json!({ "status": AppointmentStatus::Canceled.as_str() }),
            created_at: now(),
        })?;
        info!(external_id = external.id, appointment_id = %appt.id, "appointment canceled");
        return Ok(ReconcileOutcome::Canceled);
    }

    refresh_waiting_result(store, appt, external)?;

    store.append_activity(&ActivityEntry {
        id: Uuid::new_v4(),
        entity_id: appt.id.to_string(),
        action: ActivityAction::AppointmentUpdated,
        actor: None,
        current_data: json!({
            "barcode": appt.barcode,
            "organizationId": appt.organization_id,
        }),
        new_data: json!({
            "barcode": external.barcode,
            "organizationId": external.organization_id,
        }),
        created_at: now(),
    })?;
    info!(external_id = external.id, appointment_id = %appt.id, "appointment reconciled");
    Ok(ReconcileOutcome::Updated)
}

/// Find-or-create the waiting row and refresh its booking-derived fields.
/// The conditional create is what keeps replayed events from stacking up
/// duplicate waiting rows.
fn refresh_waiting_result(
    store: &RecordStore,
    appt: &Appointment,
    external: &ExternalAppointment,
) -> Result<(), EngineError> {
    let barcode = external.barcode.clone().filter(|b| !b.is_empty());
    match store.get_waiting_result(&appt.id)? {
        Some(waiting) => {
            store.update_result(
                &waiting.id,
                &TestResultPatch {
                    barcode,
                    organization_id: external.organization_id.clone().filter(|o| !o.is_empty()),
                    first_name: Some(external.first_name.clone()).filter(|n| !n.is_empty()),
                    last_name: Some(external.last_name.clone()).filter(|n| !n.is_empty()),
                    date_of_birth: external.birth_date(),
                    test_type: external.appointment_type.clone(),
                    ..Default::default()
                },
            )?;
        }
        None => {
            let result = fresh_waiting_result(appt, external);
            store.add_result(&result)?;
            store.append_activity(&ActivityEntry {
                id: Uuid::new_v4(),
                entity_id: result.id.to_string(),
                action: ActivityAction::ResultCreated,
                actor: None,
                current_data: json!({}),
                new_data: json!({ "appointmentId": appt.id, "barcode": result.barcode }),
                created_at: now(),
            })?;
        }
    }
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{make_appointment, make_external, make_result, FakeGateway};
    use crate::scheduling::ExternalPackage;

    fn event(external_id: i64) -> SyncEvent {
        SyncEvent {
            external_id,
            action: "appointment.scheduled".into(),
            calendar_id: 1,
            appointment_type_id: 7,
            return_data: false,
        }
    }

    #[test]
    fn event_accepts_both_id_spellings() {
        let a: SyncEvent = serde_json::from_value(json!({
            "id": 42, "action": "appointment.scheduled",
            "calendarID": 1, "appointmentTypeID": 7
        }))
        .unwrap();
        assert_eq!(a.external_id, 42);
        assert!(!a.return_data);

        let b: SyncEvent =
            serde_json::from_value(json!({ "acuityID": 43, "returnData": true })).unwrap();
        assert_eq!(b.external_id, 43);
        assert!(b.return_data);
    }

    #[tokio::test]
    async fn unknown_external_id_is_soft_skip() {
        let store = RecordStore::in_memory().unwrap();
        let gateway = FakeGateway::default();

        let outcome = reconcile_event(&store, &gateway, &event(5)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::InvalidExternalId);
        assert!(store.find_appointment_by_external_id(5).unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_timeout_is_soft_skip() {
        let store = RecordStore::in_memory().unwrap();
        let gateway = FakeGateway {
            time_out: true,
            ..Default::default()
        };

        let outcome = reconcile_event(&store, &gateway, &event(5)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::InvalidExternalId);
    }

    #[tokio::test]
    async fn first_event_creates_appointment_and_waiting_result() {
        let store = RecordStore::in_memory().unwrap();
        let gateway = FakeGateway::with_appointment(make_external(42));

        let outcome = reconcile_event(&store, &gateway, &event(42)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Created);

        let appt = store.find_appointment_by_external_id(42).unwrap().unwrap();
        assert_eq!(appt.status, AppointmentStatus::Pending);
        assert_eq!(appt.barcode.as_deref(), Some("KIT000042"));
        assert_eq!(appt.first_name, "Ada");

        let waiting = store.get_waiting_result(&appt.id).unwrap().unwrap();
        assert_eq!(waiting.result, ResultType::Pending);
        assert_eq!(waiting.barcode.as_deref(), Some("KIT000042"));
        assert_eq!(waiting.test_type.as_deref(), Some("PCR"));
    }

    #[tokio::test]
    async fn replayed_event_is_idempotent() {
        let store = RecordStore::in_memory().unwrap();
        let gateway = FakeGateway::with_appointment(make_external(42));

        reconcile_event(&store, &gateway, &event(42)).await.unwrap();
        let second = reconcile_event(&store, &gateway, &event(42)).await.unwrap();
        assert_eq!(second, ReconcileOutcome::Updated);

        let appt = store.find_appointment_by_external_id(42).unwrap().unwrap();
        let rows = store.results_for_appointment(&appt.id).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.iter().filter(|r| r.waiting_result).count(), 1);
    }

    #[tokio::test]
    async fn missing_barcode_is_allocated_and_written_back() {
        let store = RecordStore::in_memory().unwrap();
        let mut external = make_external(42);
        external.barcode = None;
        let gateway = FakeGateway::with_appointment(external);

        reconcile_event(&store, &gateway, &event(42)).await.unwrap();

        assert_eq!(gateway.update_count(), 1);
        let upstream = gateway.appointments.lock().unwrap()[&42].clone();
        assert_eq!(upstream.barcode.as_deref(), Some("KIT000001"));

        let appt = store.find_appointment_by_external_id(42).unwrap().unwrap();
        assert_eq!(appt.barcode.as_deref(), Some("KIT000001"));
    }

    #[tokio::test]
    async fn missing_organization_resolves_via_package_refresh() {
        let store = RecordStore::in_memory().unwrap();
        let mut external = make_external(42);
        external.organization_id = None;
        external.certificate = Some("CORP-50".into());
        let gateway = FakeGateway::with_appointment(external);
        // Cache is cold; the org only exists upstream.
        let gateway = FakeGateway {
            packages: vec![ExternalPackage {
                certificate: "CORP-50".into(),
                organization_id: Some("org-acme".into()),
                name: Some("Acme 50-pack".into()),
            }],
            ..gateway
        };

        reconcile_event(&store, &gateway, &event(42)).await.unwrap();

        let appt = store.find_appointment_by_external_id(42).unwrap().unwrap();
        assert_eq!(appt.organization_id.as_deref(), Some("org-acme"));
        // The refreshed package landed in the local cache.
        let pkg = store.get_package("CORP-50").unwrap().unwrap();
        assert_eq!(pkg.organization_id.as_deref(), Some("org-acme"));
    }

    #[tokio::test]
    async fn unresolvable_organization_is_logged_not_fatal() {
        let store = RecordStore::in_memory().unwrap();
        let mut external = make_external(42);
        external.organization_id = None;
        external.certificate = Some("UNKNOWN".into());
        let gateway = FakeGateway::with_appointment(external);

        let outcome = reconcile_event(&store, &gateway, &event(42)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Created);

        let appt = store.find_appointment_by_external_id(42).unwrap().unwrap();
        assert!(appt.organization_id.is_none());
    }

    #[tokio::test]
    async fn terminal_appointment_is_untouched() {
        let store = RecordStore::in_memory().unwrap();
        let mut appt = make_appointment(42);
        appt.status = AppointmentStatus::Reported;
        appt.organization_id = Some("org-1".into());
        store.add_appointment(&appt).unwrap();

        let mut external = make_external(42);
        external.organization_id = Some("org-other".into());
        external.barcode = Some("KIT999999".into());
        let gateway = FakeGateway::with_appointment(external);

        let outcome = reconcile_event(&store, &gateway, &event(42)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::AlreadyTerminal);

        let unchanged = store.get_appointment(&appt.id).unwrap().unwrap();
        assert_eq!(unchanged.barcode.as_deref(), Some("KIT000042"));
        assert_eq!(unchanged.organization_id.as_deref(), Some("org-1"));
    }

    #[tokio::test]
    async fn cancellation_deletes_waiting_result() {
        let store = RecordStore::in_memory().unwrap();
        let mut appt = make_appointment(42);
        appt.status = AppointmentStatus::InProgress;
        store.add_appointment(&appt).unwrap();
        store.add_result(&make_result(&appt)).unwrap();

        let mut external = make_external(42);
        external.canceled = true;
        let gateway = FakeGateway::with_appointment(external);

        let outcome = reconcile_event(&store, &gateway, &event(42)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Canceled);

        let updated = store.get_appointment(&appt.id).unwrap().unwrap();
        assert_eq!(updated.status, AppointmentStatus::Canceled);
        assert!(updated.canceled);
        assert!(store.get_waiting_result(&appt.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn update_refreshes_fields_and_recreates_waiting_row() {
        let store = RecordStore::in_memory().unwrap();
        let mut appt = make_appointment(42);
        appt.status = AppointmentStatus::Received;
        store.add_appointment(&appt).unwrap();
        // No waiting row, e.g. after a crash between the two create writes.

        let mut external = make_external(42);
        external.first_name = "Augusta".into();
        let gateway = FakeGateway::with_appointment(external);

        let outcome = reconcile_event(&store, &gateway, &event(42)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Updated);

        let updated = store.get_appointment(&appt.id).unwrap().unwrap();
        assert_eq!(updated.first_name, "Augusta");
        assert_eq!(updated.status, AppointmentStatus::Received);

        let waiting = store.get_waiting_result(&appt.id).unwrap().unwrap();
        assert_eq!(waiting.first_name, "Augusta");
    }
}
