//! Bulk result upload processing.
//!
//! A batch is a list of rows keyed by barcode sharing one result date and
//! scheduling window. Rows run through the action state machine
//! concurrently; one bad row never aborts the batch, and ambiguous
//! (duplicated) barcodes are refused rather than guessed at.

use std::collections::HashMap;

use chrono::NaiveDate;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::store::RecordStore;
use crate::dispatch::ResultDispatcher;
use crate::engine::actions::{self, ActionRequest, ResultAction};
use crate::engine::EngineError;
use crate::models::{Appointment, ResultAnalysis};

/// One uploaded row. `result` carries the action to take, in the same
/// vocabulary as the single-result endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRow {
    #[serde(alias = "barCode")]
    pub barcode: String,
    pub result: ResultAction,
    #[serde(default)]
    pub send_again: bool,
    #[serde(default)]
    pub result_analysis: Vec<ResultAnalysis>,
    #[serde(default)]
    pub admin_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRow {
    pub barcode: String,
    pub reason: String,
}

/// Per-batch manifest. The batch as a whole always succeeds; rows that
/// could not be processed are listed here.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReport {
    pub processed: usize,
    pub failed_rows: Vec<FailedRow>,
    pub not_found_barcodes: Vec<String>,
}

/// Run a batch of rows through the action state machine. Only a batch-wide
/// precondition failure (the shared result date) is a hard error.
pub async fn process_batch<D: ResultDispatcher>(
    store: &RecordStore,
    dispatcher: &D,
    from: NaiveDate,
    to: NaiveDate,
    result_date: NaiveDate,
    rows: &[BulkRow],
) -> Result<BulkReport, EngineError> {
    actions::validate_result_date(result_date)?;

    // A barcode occurring twice in one batch is ambiguous; refuse every
    // row carrying it instead of picking one.
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for row in rows {
        *counts.entry(row.barcode.as_str()).or_default() += 1;
    }

    let by_barcode = prefetch_appointments(store, from, to)?;

    let mut report = BulkReport::default();
    let mut pending = Vec::new();
    for row in rows {
        if counts[row.barcode.as_str()] > 1 {
            warn!(barcode = %row.barcode, "duplicate barcode in batch");
            report.not_found_barcodes.push(row.barcode.clone());
            continue;
        }
        match by_barcode.get(row.barcode.as_str()) {
            Some(appt) => pending.push(process_row(store, dispatcher, appt, row, result_date)),
            None => report.not_found_barcodes.push(row.barcode.clone()),
        }
    }

    for (barcode, outcome) in join_all(pending).await {
        match outcome {
            Ok(()) => report.processed += 1,
            Err(e) => {
                warn!(%barcode, error = %e, "bulk row failed");
                report.failed_rows.push(FailedRow {
                    barcode,
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        rows = rows.len(),
        processed = report.processed,
        failed = report.failed_rows.len(),
        not_found = report.not_found_barcodes.len(),
        "batch processed"
    );
    Ok(report)
}

fn prefetch_appointments(
    store: &RecordStore,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<HashMap<String, Appointment>, EngineError> {
    let mut by_barcode = HashMap::new();
    for appt in store.appointments_scheduled_between(from, to)? {
        if let Some(barcode) = appt.barcode.clone() {
            by_barcode.insert(barcode, appt);
        }
    }
    Ok(by_barcode)
}

async fn process_row<D: ResultDispatcher>(
    store: &RecordStore,
    dispatcher: &D,
    appointment: &Appointment,
    row: &BulkRow,
    result_date: NaiveDate,
) -> (String, Result<(), EngineError>) {
    let req = ActionRequest {
        barcode: row.barcode.clone(),
        action: row.result,
        auto_result: None,
        result_analysis: row.result_analysis.clone(),
        result_date,
        notify: true,
        send_again: row.send_again,
        admin_id: row.admin_id.clone(),
    };

    let outcome = async {
        actions::validate_analysis(&req.result_analysis)?;
        actions::run_action(store, dispatcher, appointment, &req).await?;
        Ok(())
    }
    .await;
    (row.barcode.clone(), outcome)
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::actions::org_today;
    use crate::models::{AppointmentStatus, ResultType};
    use crate::testutil::{make_appointment, make_result, FakeDispatcher};
    use chrono::Duration;
    use serde_json::json;

    fn seeded_batch(store: &RecordStore, ids: &[i64]) {
        for &id in ids {
            let mut appt = make_appointment(id);
            appt.status = AppointmentStatus::InProgress;
            appt.scheduled_at = org_today().and_hms_opt(9, 0, 0);
            store.add_appointment(&appt).unwrap();
            store.add_result(&make_result(&appt)).unwrap();
        }
    }

    fn row(id: i64, action: ResultAction) -> BulkRow {
        BulkRow {
            barcode: format!("KIT{id:06}"),
            result: action,
            send_again: false,
            result_analysis: Vec::new(),
            admin_id: Some("admin-1".into()),
        }
    }

    fn window() -> (NaiveDate, NaiveDate) {
        (org_today() - Duration::days(7), org_today())
    }

    #[test]
    fn bulk_row_parses_wire_shape() {
        let row: BulkRow = serde_json::from_value(json!({
            "barCode": "KIT000009",
            "result": "negative",
            "sendAgain": false
        }))
        .unwrap();
        assert_eq!(row.barcode, "KIT000009");
        assert_eq!(row.result, ResultAction::MarkAsNegative);
        assert!(!row.send_again);
    }

    #[tokio::test]
    async fn all_rows_succeed() {
        let store = RecordStore::in_memory().unwrap();
        seeded_batch(&store, &[1, 2, 3]);
        let dispatcher = FakeDispatcher::default();
        let (from, to) = window();

        let rows = vec![
            row(1, ResultAction::MarkAsNegative),
            row(2, ResultAction::MarkAsPositive),
            row(3, ResultAction::ReRunToday),
        ];
        let report = process_batch(&store, &dispatcher, from, to, org_today(), &rows)
            .await
            .unwrap();

        assert_eq!(report.processed, 3);
        assert!(report.failed_rows.is_empty());
        assert!(report.not_found_barcodes.is_empty());
        // Re-run rows do not dispatch.
        assert_eq!(dispatcher.sent_count(), 2);
    }

    #[tokio::test]
    async fn unknown_barcode_is_isolated() {
        let store = RecordStore::in_memory().unwrap();
        seeded_batch(&store, &[1, 2]);
        let dispatcher = FakeDispatcher::default();
        let (from, to) = window();

        let mut rows = vec![
            row(1, ResultAction::MarkAsNegative),
            row(2, ResultAction::MarkAsNegative),
        ];
        rows.push(BulkRow {
            barcode: "KIT999999".into(),
            result: ResultAction::MarkAsNegative,
            send_again: false,
            result_analysis: Vec::new(),
            admin_id: None,
        });

        let report = process_batch(&store, &dispatcher, from, to, org_today(), &rows)
            .await
            .unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.not_found_barcodes, vec!["KIT999999".to_string()]);
        assert!(report.failed_rows.is_empty());
    }

    #[tokio::test]
    async fn duplicate_barcodes_are_refused_not_guessed() {
        let store = RecordStore::in_memory().unwrap();
        seeded_batch(&store, &[1, 2]);
        let dispatcher = FakeDispatcher::default();
        let (from, to) = window();

        let rows = vec![
            row(1, ResultAction::MarkAsNegative),
            row(2, ResultAction::MarkAsNegative),
            row(2, ResultAction::MarkAsPositive),
        ];
        let report = process_batch(&store, &dispatcher, from, to, org_today(), &rows)
            .await
            .unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(
            report.not_found_barcodes,
            vec!["KIT000002".to_string(), "KIT000002".to_string()]
        );

        // The ambiguous appointment was not touched.
        let appt = store.find_appointment_by_external_id(2).unwrap().unwrap();
        assert_eq!(appt.status, AppointmentStatus::InProgress);
    }

    #[tokio::test]
    async fn row_failure_does_not_abort_siblings() {
        let store = RecordStore::in_memory().unwrap();
        seeded_batch(&store, &[1, 2]);
        // Row 2's appointment is already reported.
        let appt = store.find_appointment_by_external_id(2).unwrap().unwrap();
        store
            .update_appointment(
                &appt.id,
                &crate::models::AppointmentPatch {
                    status: Some(AppointmentStatus::Reported),
                    ..Default::default()
                },
            )
            .unwrap();

        let dispatcher = FakeDispatcher::default();
        let (from, to) = window();
        let rows = vec![
            row(1, ResultAction::MarkAsNegative),
            row(2, ResultAction::MarkAsNegative),
        ];
        let report = process_batch(&store, &dispatcher, from, to, org_today(), &rows)
            .await
            .unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.failed_rows.len(), 1);
        assert_eq!(report.failed_rows[0].barcode, "KIT000002");
    }

    #[tokio::test]
    async fn send_again_row_resends_reported_result() {
        let store = RecordStore::in_memory().unwrap();
        seeded_batch(&store, &[1]);
        let dispatcher = FakeDispatcher::default();
        let (from, to) = window();

        let first = vec![row(1, ResultAction::MarkAsPositive)];
        process_batch(&store, &dispatcher, from, to, org_today(), &first)
            .await
            .unwrap();

        let mut resend = row(1, ResultAction::MarkAsPositive);
        resend.send_again = true;
        let report = process_batch(&store, &dispatcher, from, to, org_today(), &[resend])
            .await
            .unwrap();

        assert_eq!(report.processed, 1);
        assert!(report.failed_rows.is_empty());
        assert_eq!(dispatcher.sent_count(), 2);
    }

    #[tokio::test]
    async fn stale_batch_date_is_a_hard_error() {
        let store = RecordStore::in_memory().unwrap();
        seeded_batch(&store, &[1]);
        let dispatcher = FakeDispatcher::default();
        let (from, to) = window();

        let rows = vec![row(1, ResultAction::MarkAsNegative)];
        let err = process_batch(
            &store,
            &dispatcher,
            from,
            to,
            org_today() - Duration::days(31),
            &rows,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)));
    }

    #[tokio::test]
    async fn skipped_rows_count_as_processed() {
        let store = RecordStore::in_memory().unwrap();
        seeded_batch(&store, &[1]);
        let dispatcher = FakeDispatcher::default();
        let (from, to) = window();

        let rows = vec![row(1, ResultAction::DoNothing)];
        let report = process_batch(&store, &dispatcher, from, to, org_today(), &rows)
            .await
            .unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(dispatcher.sent_count(), 0);
    }
}
