use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::{campaigns, ws};
use crate::infra::AppState;

pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/campaigns/generation", post(campaigns::create_generation))
        .route("/api/campaigns/dns", post(campaigns::create_dns))
        .route(
            "/api/campaigns/http-keyword",
            post(campaigns::create_http_keyword),
        )
        .route("/api/campaigns", get(campaigns::list_campaigns))
        .route("/api/campaigns/{id}", get(campaigns::get_campaign))
        .route("/api/campaigns/{id}", delete(campaigns::delete_campaign))
        .route("/api/campaigns/{id}/status", get(campaigns::campaign_status))
        .route("/api/campaigns/{id}/start", post(campaigns::start_campaign))
        .route("/api/campaigns/{id}/pause", post(campaigns::pause_campaign))
        .route("/api/campaigns/{id}/resume", post(campaigns::resume_campaign))
        .route("/api/campaigns/{id}/cancel", post(campaigns::cancel_campaign))
        .route("/api/campaigns/{id}/archive", post(campaigns::archive_campaign))
        .route(
            "/api/campaigns/{id}/domains",
            get(campaigns::list_generated_domains),
        )
        .route(
            "/api/campaigns/{id}/dns-results",
            get(campaigns::list_dns_results),
        )
        .route(
            "/api/campaigns/{id}/http-results",
            get(campaigns::list_http_results),
        )
        .route("/api/ws", get(ws::ws_handler))
        .with_state(state)
}
