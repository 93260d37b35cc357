//! Single and bulk result reporting endpoints.

use axum::extract::State;
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, DataEnvelope};
use crate::dispatch::ResultDispatcher;
use crate::engine::{apply_action, process_batch, ActionRequest, BulkReport, BulkRow, ResultAction};
use crate::models::{ResultAnalysis, ResultType};
use crate::scheduling::SchedulingGateway;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleResultBody {
    #[serde(alias = "barCode")]
    pub barcode: String,
    pub action: ResultAction,
    pub auto_result: Option<ResultType>,
    #[serde(default)]
    pub result_analysis: Vec<ResultAnalysis>,
    pub result_date: NaiveDate,
    #[serde(default)]
    pub notify: bool,
    #[serde(default, alias = "sendUpdatedResults")]
    pub send_again: bool,
    pub admin_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SingleResultResponse {
    pub id: Option<Uuid>,
}

/// `POST /api/results` — apply one action to the result behind a barcode.
pub async fn report<G, D>(
    State(ctx): State<ApiContext<G, D>>,
    Json(body): Json<SingleResultBody>,
) -> Result<Json<DataEnvelope<SingleResultResponse>>, ApiError>
where
    G: SchedulingGateway + Send + Sync + 'static,
    D: ResultDispatcher + Send + Sync + 'static,
{
    let req = ActionRequest {
        barcode: body.barcode,
        action: body.action,
        auto_result: body.auto_result,
        result_analysis: body.result_analysis,
        result_date: body.result_date,
        notify: body.notify,
        send_again: body.send_again,
        admin_id: body.admin_id,
    };
    let outcome = apply_action(&ctx.store, ctx.dispatcher.as_ref(), &req).await?;
    Ok(Json(DataEnvelope::new(SingleResultResponse {
        id: outcome.result_id,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkBody {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub result_date: NaiveDate,
    pub results: Vec<BulkRow>,
}

/// `POST /api/results/bulk` — run a batch of rows through the state
/// machine. Partial row failures never fail the request; the manifest
/// lists what was skipped and why.
pub async fn bulk<G, D>(
    State(ctx): State<ApiContext<G, D>>,
    Json(body): Json<BulkBody>,
) -> Result<Json<DataEnvelope<BulkReport>>, ApiError>
where
    G: SchedulingGateway + Send + Sync + 'static,
    D: ResultDispatcher + Send + Sync + 'static,
{
    let report = process_batch(
        &ctx.store,
        ctx.dispatcher.as_ref(),
        body.from,
        body.to,
        body.result_date,
        &body.results,
    )
    .await?;
    Ok(Json(DataEnvelope::new(report)))
}
