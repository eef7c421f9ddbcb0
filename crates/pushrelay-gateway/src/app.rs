use axum::{
    routing::{delete, get},
    Router,
};
use pushrelay_core::RelayConfig;
use pushrelay_scheduler::Scheduler;
use std::sync::Arc;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: RelayConfig,
    pub scheduler: Scheduler,
}

impl AppState {
    pub fn new(config: RelayConfig, scheduler: Scheduler) -> Self {
        Self { config, scheduler }
    }
}

/// Assemble the Axum router. Schedule routes are mounted under the configured
/// prefix; `/health` always sits at the root.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route(
            "/schedule",
            get(crate::http::schedule::list_entries).post(crate::http::schedule::schedule_push),
        )
        .route("/schedule/{id}", delete(crate::http::schedule::remove_entry));

    let prefix = normalize_prefix(&state.config.gateway.prefix);
    let router = Router::new().route("/health", get(crate::http::health::health_handler));
    let router = match prefix {
        Some(prefix) => router.nest(&prefix, api),
        None => router.merge(api),
    };

    router
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// `"api/"` → `"/api"`; empty or `"/"` means no prefix.
fn normalize_prefix(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("/{trimmed}"))
    }
}
