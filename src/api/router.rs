//! API router assembly.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::endpoints;
use crate::api::types::ApiContext;
use crate::dispatch::ResultDispatcher;
use crate::scheduling::SchedulingGateway;

/// Build the API router. Routes live under `/api/`.
///
/// NOTE: path params would use `:param` syntax (matchit 0.7 / axum 0.7).
pub fn api_router<G, D>(ctx: ApiContext<G, D>) -> Router
where
    G: SchedulingGateway + Send + Sync + 'static,
    D: ResultDispatcher + Send + Sync + 'static,
{
    Router::new()
        .route("/api/health", get(endpoints::health::check))
        .route("/api/sync", post(endpoints::webhook::receive::<G, D>))
        .route("/api/results", post(endpoints::results::report::<G, D>))
        .route("/api/results/bulk", post(endpoints::results::bulk::<G, D>))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
