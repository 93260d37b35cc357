//! Result-action state machine.
//!
//! Every state-changing operation on a test result flows through
//! [`apply_action`]: finalizing and reporting a result, scheduling a
//! re-run of the same sample, or requesting a fresh collection. Actions
//! are an exhaustively-matched sum type, so adding one is a
//! compile-time-checked change rather than a string lookup.

use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config;
use crate::db::store::{now, RecordStore};
use crate::dispatch::{DispatchRequest, ResultDispatcher};
use crate::engine::EngineError;
use crate::models::{
    ActivityAction, ActivityEntry, Appointment, AppointmentPatch, AppointmentStatus,
    ResultAnalysis, ResultType, TestResult, TestResultPatch,
};

// ─── Action vocabulary ────────────────────────────────────────────────────

/// Requested operation on a waiting result. Wire form is camelCase
/// (`sendThisResult`, `reRunToday`, ...); PascalCase is accepted too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultAction {
    #[serde(alias = "SendThisResult")]
    SendThisResult,
    #[serde(alias = "MarkAsPositive", alias = "positive")]
    MarkAsPositive,
    #[serde(alias = "MarkAsNegative", alias = "negative")]
    MarkAsNegative,
    #[serde(alias = "SendPreliminaryPositive", alias = "preliminaryPositive")]
    SendPreliminaryPositive,
    #[serde(alias = "MarkAsPresumptivePositive", alias = "presumptivePositive")]
    MarkAsPresumptivePositive,
    #[serde(alias = "ReRunToday")]
    ReRunToday,
    #[serde(alias = "ReRunTomorrow")]
    ReRunTomorrow,
    #[serde(alias = "RecollectAsInvalid", alias = "invalid")]
    RecollectAsInvalid,
    #[serde(alias = "RecollectAsInconclusive", alias = "inconclusive")]
    RecollectAsInconclusive,
    #[serde(alias = "DoNothing")]
    DoNothing,
}

impl ResultAction {
    /// Actions that may be replayed against an already-reported result
    /// when the caller passes the send-again flag.
    pub fn allows_resend(&self) -> bool {
        !matches!(self, Self::DoNothing)
    }

    pub fn is_reporting(&self) -> bool {
        matches!(
            self,
            Self::SendThisResult
                | Self::MarkAsPositive
                | Self::MarkAsNegative
                | Self::SendPreliminaryPositive
                | Self::MarkAsPresumptivePositive
        )
    }

    pub fn is_re_run(&self) -> bool {
        matches!(self, Self::ReRunToday | Self::ReRunTomorrow)
    }

    pub fn is_re_collect(&self) -> bool {
        matches!(self, Self::RecollectAsInvalid | Self::RecollectAsInconclusive)
    }

    /// Final result value a reporting action stamps on the row.
    /// `SendThisResult` reports the instrument's own reading, so it
    /// requires `auto_result`.
    fn reported_value(&self, auto_result: Option<ResultType>) -> Result<ResultType, EngineError> {
        match self {
            Self::SendThisResult => auto_result.ok_or_else(|| {
                EngineError::BadRequest("autoResult is required for sendThisResult".into())
            }),
            Self::MarkAsPositive => Ok(ResultType::Positive),
            Self::MarkAsNegative => Ok(ResultType::Negative),
            Self::SendPreliminaryPositive => Ok(ResultType::PreliminaryPositive),
            Self::MarkAsPresumptivePositive => Ok(ResultType::PresumptivePositive),
            _ => Err(EngineError::BadRequest(format!(
                "action {self:?} does not report a result"
            ))),
        }
    }

    /// Value stamped on the retired row when a re-collection is requested.
    fn retired_value(&self) -> Result<ResultType, EngineError> {
        match self {
            Self::RecollectAsInvalid => Ok(ResultType::Invalid),
            Self::RecollectAsInconclusive => Ok(ResultType::Inconclusive),
            _ => Err(EngineError::BadRequest(format!(
                "action {self:?} is not a re-collection"
            ))),
        }
    }
}

// ─── Request / outcome ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub barcode: String,
    pub action: ResultAction,
    /// Instrument-reported value, consumed by `SendThisResult`.
    pub auto_result: Option<ResultType>,
    pub result_analysis: Vec<ResultAnalysis>,
    pub result_date: NaiveDate,
    pub notify: bool,
    pub send_again: bool,
    pub admin_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Reported,
    ReRunScheduled,
    RecollectRequested,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub appointment_id: Uuid,
    pub result_id: Option<Uuid>,
    pub disposition: Disposition,
    pub dispatched: bool,
}

// ─── Validation ───────────────────────────────────────────────────────────

/// "Today" in the organization's configured time zone.
pub fn org_today() -> NaiveDate {
    Utc::now()
        .with_timezone(&config::org_utc_offset())
        .date_naive()
}

/// The result date must fall in the trailing 30-day window ending today,
/// boundaries inclusive. Shared by the single and bulk paths.
pub fn validate_result_date(date: NaiveDate) -> Result<(), EngineError> {
    let today = org_today();
    let earliest = today - Duration::days(config::RESULT_WINDOW_DAYS);
    if date < earliest || date > today {
        return Err(EngineError::BadRequest(
            "result date does not match the time range".into(),
        ));
    }
    Ok(())
}

/// Numeric analysis channels must read below the reporting ceiling.
pub fn validate_analysis(analysis: &[ResultAnalysis]) -> Result<(), EngineError> {
    for channel in analysis {
        if let Some(value) = channel.numeric() {
            if value >= config::CHANNEL_VALUE_CEILING {
                return Err(EngineError::BadRequest(format!(
                    "analysis channel {} value {value} exceeds the reporting ceiling",
                    channel.label
                )));
            }
        }
    }
    Ok(())
}

// ─── Entry points ─────────────────────────────────────────────────────────

/// Apply one action to the result identified by barcode. Validation is
/// all-or-nothing: nothing is written unless every check passes.
pub async fn apply_action<D: ResultDispatcher>(
    store: &RecordStore,
    dispatcher: &D,
    req: &ActionRequest,
) -> Result<ActionOutcome, EngineError> {
    validate_result_date(req.result_date)?;
    validate_analysis(&req.result_analysis)?;

    let appointment = store
        .find_appointment_by_barcode(&req.barcode)?
        .ok_or_else(|| {
            EngineError::NotFound(format!("no appointment for barcode {}", req.barcode))
        })?;

    run_action(store, dispatcher, &appointment, req).await
}

/// Action core shared with the bulk processor, which pre-fetches the
/// appointment itself. Callers must have validated the request already.
pub(crate) async fn run_action<D: ResultDispatcher>(
    store: &RecordStore,
    dispatcher: &D,
    appointment: &Appointment,
    req: &ActionRequest,
) -> Result<ActionOutcome, EngineError> {
    if appointment.canceled {
        return Err(EngineError::Conflict(format!(
            "appointment {} is canceled",
            appointment.id
        )));
    }

    let rows = store.results_for_appointment(&appointment.id)?;
    let current = rows
        .iter()
        .find(|r| r.waiting_result)
        .or_else(|| rows.last())
        .cloned()
        .ok_or_else(|| {
            EngineError::NotFound(format!("no test result for barcode {}", req.barcode))
        })?;

    // An already-reported result is locked unless the action permits a
    // resend and the caller explicitly asked for one.
    if appointment.status == AppointmentStatus::Reported || current.confirmed {
        if !req.action.allows_resend() {
            return Err(EngineError::Conflict(format!(
                "result {} is already reported",
                current.id
            )));
        }
        if !req.send_again {
            return Err(EngineError::Conflict(format!(
                "result {} is already reported; pass sendUpdatedResults to resend",
                current.id
            )));
        }
    }

    match req.action {
        ResultAction::DoNothing => {
            info!(appointment_id = %appointment.id, barcode = %req.barcode, "row skipped");
            Ok(ActionOutcome {
                appointment_id: appointment.id,
                result_id: Some(current.id),
                disposition: Disposition::Skipped,
                dispatched: false,
            })
        }
        action if action.is_reporting() => {
            finalize_and_report(store, dispatcher, appointment, &current, req).await
        }
        action if action.is_re_run() => schedule_re_run(store, appointment, &current, req),
        _ => request_re_collection(store, appointment, &current, req),
    }
}

// ─── Reporting family ─────────────────────────────────────────────────────

async fn finalize_and_report<D: ResultDispatcher>(
    store: &RecordStore,
    dispatcher: &D,
    appointment: &Appointment,
    current: &TestResult,
    req: &ActionRequest,
) -> Result<ActionOutcome, EngineError> {
    let value = req.action.reported_value(req.auto_result)?;

    store.update_result(
        &current.id,
        &TestResultPatch {
            result: Some(value),
            confirmed: Some(true),
            waiting_result: Some(false),
            admin_id: req.admin_id.clone(),
            result_analysis: Some(req.result_analysis.clone()),
            result_date: Some(req.result_date),
            ..Default::default()
        },
    )?;
    store.update_appointment(
        &appointment.id,
        &AppointmentPatch {
            status: Some(AppointmentStatus::Reported),
            latest_result: Some(value),
            ..Default::default()
        },
    )?;
    store.append_activity(&ActivityEntry {
        id: Uuid::new_v4(),
        entity_id: current.id.to_string(),
        action: ActivityAction::ResultReported,
        actor: req.admin_id.clone(),
        current_data: json!({ "result": current.result.as_str() }),
        new_data: json!({ "result": value.as_str(), "resultDate": req.result_date }),
        created_at: now(),
    })?;

    let mut dispatched = false;
    if req.notify {
        let delivery = DispatchRequest {
            result_id: current.id,
            appointment_id: appointment.id,
            barcode: current.barcode.clone(),
            result: value,
            email: appointment.email.clone(),
            phone: appointment.phone.clone(),
        };
        // The result is final at this point; a delivery failure is retried
        // out of band, not rolled back.
        match dispatcher.dispatch(&delivery).await {
            Ok(()) => dispatched = true,
            Err(e) => {
                warn!(result_id = %current.id, error = %e, "report dispatch failed");
            }
        }
    }

    info!(
        appointment_id = %appointment.id,
        result_id = %current.id,
        result = value.as_str(),
        dispatched,
        "result reported"
    );
    Ok(ActionOutcome {
        appointment_id: appointment.id,
        result_id: Some(current.id),
        disposition: Disposition::Reported,
        dispatched,
    })
}

// ─── Re-test family ───────────────────────────────────────────────────────

fn schedule_re_run(
    store: &RecordStore,
    appointment: &Appointment,
    current: &TestResult,
    req: &ActionRequest,
) -> Result<ActionOutcome, EngineError> {
    let run_date = match req.action {
        ResultAction::ReRunTomorrow => org_today() + Duration::days(1),
        _ => org_today(),
    };

    // Same physical sample: the row stays waiting, only the run counter
    // moves.
    store.update_result(
        &current.id,
        &TestResultPatch {
            run_number: Some(current.run_number + 1),
            waiting_result: Some(true),
            confirmed: Some(false),
            admin_id: req.admin_id.clone(),
            ..Default::default()
        },
    )?;
    store.update_appointment(
        &appointment.id,
        &AppointmentPatch {
            status: Some(AppointmentStatus::ReRunRequired),
            deadline: run_date.and_hms_opt(23, 59, 59),
            ..Default::default()
        },
    )?;
    store.append_activity(&ActivityEntry {
        id: Uuid::new_v4(),
        entity_id: current.id.to_string(),
        action: ActivityAction::ResultReRun,
        actor: req.admin_id.clone(),
        current_data: json!({ "runNumber": current.run_number }),
        new_data: json!({ "runNumber": current.run_number + 1, "runDate": run_date }),
        created_at: now(),
    })?;

    info!(
        appointment_id = %appointment.id,
        result_id = %current.id,
        run_number = current.run_number + 1,
        %run_date,
        "re-run scheduled"
    );
    Ok(ActionOutcome {
        appointment_id: appointment.id,
        result_id: Some(current.id),
        disposition: Disposition::ReRunScheduled,
        dispatched: false,
    })
}

// ─── Re-collection family ─────────────────────────────────────────────────

fn request_re_collection(
    store: &RecordStore,
    appointment: &Appointment,
    current: &TestResult,
    req: &ActionRequest,
) -> Result<ActionOutcome, EngineError> {
    let retired = req.action.retired_value()?;

    // Retire the current row with the reason, then open a continuation
    // row that waits for the fresh sample. The old barcode joins the
    // linked chain; the new draw gets its own barcode at reconciliation.
    store.update_result(
        &current.id,
        &TestResultPatch {
            result: Some(retired),
            waiting_result: Some(false),
            admin_id: req.admin_id.clone(),
            result_analysis: Some(req.result_analysis.clone()),
            result_date: Some(req.result_date),
            ..Default::default()
        },
    )?;

    let mut linked = current.linked_barcodes.clone();
    if let Some(barcode) = &current.barcode {
        if !linked.contains(barcode) {
            linked.push(barcode.clone());
        }
    }
    let continuation = TestResult {
        id: Uuid::new_v4(),
        appointment_id: appointment.id,
        barcode: None,
        result: ResultType::Pending,
        waiting_result: true,
        recollected: true,
        run_number: 1,
        re_collect_number: current.re_collect_number + 1,
        display_in_result: current.display_in_result,
        confirmed: false,
        previous_result: Some(retired),
        linked_barcodes: linked,
        organization_id: current.organization_id.clone(),
        admin_id: req.admin_id.clone(),
        result_analysis: Vec::new(),
        result_date: None,
        first_name: current.first_name.clone(),
        last_name: current.last_name.clone(),
        date_of_birth: current.date_of_birth,
        test_type: current.test_type.clone(),
        created_at: now(),
        updated_at: now(),
    };
    store.add_result(&continuation)?;

    store.update_appointment(
        &appointment.id,
        &AppointmentPatch {
            status: Some(AppointmentStatus::ReCollectRequired),
            latest_result: Some(retired),
            ..Default::default()
        },
    )?;
    store.append_activity(&ActivityEntry {
        id: Uuid::new_v4(),
        entity_id: current.id.to_string(),
        action: ActivityAction::ResultRecollected,
        actor: req.admin_id.clone(),
        current_data: json!({
            "result": current.result.as_str(),
            "reCollectNumber": current.re_collect_number,
        }),
        new_data: json!({
            "result": retired.as_str(),
            "reCollectNumber": continuation.re_collect_number,
            "continuationId": continuation.id,
        }),
        created_at: now(),
    })?;

    info!(
        appointment_id = %appointment.id,
        retired_result_id = %current.id,
        continuation_id = %continuation.id,
        re_collect_number = continuation.re_collect_number,
        "re-collection requested"
    );
    Ok(ActionOutcome {
        appointment_id: appointment.id,
        result_id: Some(continuation.id),
        disposition: Disposition::RecollectRequested,
        dispatched: false,
    })
}

// ─── Tests ────────────────────────────────────────────────────────────────
