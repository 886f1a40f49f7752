use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post, MethodRouter};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::routes::{route_catalog, RouteDefinition};
use crate::contract::HttpMethod;
use crate::db::learning::{LearningRepoError, LearningStore, SharedLearningStore};
use crate::db::resolve_db_config;
use crate::settings::{TutorSettings, DEFAULT_HISTORY_PAGE_SIZE};
use crate::tutor::planner::{OpenAiCompatiblePlanner, Planner, ScriptedPlanner};
use crate::tutor::semantic::{Embedder, HttpEmbedder, LessonSearch};
use crate::tutor::tools::{ToolCatalog, ToolExecutor};
use crate::tutor::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub service_name: &'static str,
    pub service_version: &'static str,
    pub started_unix_ms: u128,
    pub route_count: usize,
    pub dev_student_id: Option<String>,
    pub history_page_size: usize,
    pub store: SharedLearningStore,
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn new(
        store: SharedLearningStore,
        search: Arc<LessonSearch>,
        planner: Arc<dyn Planner>,
    ) -> Self {
        let executor = ToolExecutor::new(
            Arc::new(ToolCatalog::standard()),
            Arc::clone(&store),
            search,
        );
        Self {
            service_name: "tutor-backend-core",
            service_version: env!("CARGO_PKG_VERSION"),
            started_unix_ms: now_unix_ms(),
            route_count: 0,
            dev_student_id: None,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            orchestrator: Orchestrator::new(Arc::clone(&store), executor, planner),
            store,
        }
    }

    /// State with keyword-only lesson search.
    pub fn with_planner(store: SharedLearningStore, planner: Arc<dyn Planner>) -> Self {
        let search = Arc::new(LessonSearch::keyword_only(Arc::clone(&store)));
        Self::new(store, search, planner)
    }

    pub fn with_dev_student(mut self, student_id: Option<String>) -> Self {
        self.dev_student_id = student_id
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        self
    }

    pub fn with_history_page_size(mut self, page_size: usize) -> Self {
        self.history_page_size = page_size.max(1);
        self
    }

    pub fn from_settings(app_root: &Path, settings: &TutorSettings) -> Result<Self, LearningRepoError> {
        let db = resolve_db_config(app_root, settings.db_path.as_deref());
        let store = Arc::new(LearningStore::new(db.app_db_path));
        store.initialize()?;

        let embedder = HttpEmbedder::from_settings(&settings.embeddings)
            .map(|embedder| Arc::new(embedder) as Arc<dyn Embedder>);
        let search = Arc::new(LessonSearch::new(Arc::clone(&store), embedder));
        Ok(Self::new(store, search, planner_from_settings(settings))
            .with_dev_student(settings.dev_student_id.clone())
            .with_history_page_size(settings.history_page_size))
    }
}

fn planner_from_settings(settings: &TutorSettings) -> Arc<dyn Planner> {
    if settings.planner.base_url.is_none() {
        warn!("no planner endpoint configured; tutor turns will answer with a notice");
        return Arc::new(ScriptedPlanner::unconfigured());
    }
    match OpenAiCompatiblePlanner::from_settings(&settings.planner) {
        Ok(planner) => Arc::new(planner),
        Err(error) => {
            warn!(error = %error, "planner unavailable; tutor turns will answer with a notice");
            Arc::new(ScriptedPlanner::unconfigured())
        }
    }
}

pub fn build_router(mut state: AppState) -> Router {
    let catalog = route_catalog();
    state.route_count = catalog.len();

    let mut router = Router::new();
    for route in catalog {
        // Routes sharing a path merge their method routers.
        router = router.route(route.spec.path.as_str(), method_router_for(&route));
    }

    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::api::auth::auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = build_router(state);
    info!(bind = %addr, "starting tutor-backend-core HTTP surface");
    axum::serve(listener, app).await
}

fn method_router_for(route: &RouteDefinition) -> MethodRouter<AppState> {
    match (route.spec.method, route.spec.path.as_str()) {
        (HttpMethod::Post, "/tutor") => post(crate::api::tutor::submit_turn_handler),
        (HttpMethod::Get, "/tutor") => get(crate::api::tutor::history_handler),
        (HttpMethod::Get, "/tutor/tools") => get(crate::api::tutor::list_tools_handler),
        _ => get(health_handler),
    }
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "status": "ok",
            "service": state.service_name,
            "version": state.service_version,
            "started_unix_ms": state.started_unix_ms,
            "route_count": state.route_count,
        })),
    )
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}
