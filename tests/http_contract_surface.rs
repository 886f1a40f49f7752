use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use tower::ServiceExt;
use uuid::Uuid;

use tutor_backend_core::api::routes::route_catalog;
use tutor_backend_core::api::server::{build_router, AppState};
use tutor_backend_core::contract::HttpMethod;
use tutor_backend_core::db::learning::LearningStore;
use tutor_backend_core::tutor::planner::ScriptedPlanner;

#[tokio::test]
async fn every_catalog_route_is_http_mounted() {
    let suffix = Uuid::new_v4().to_string();
    let root = std::env::temp_dir().join(format!("tutor_contract_test_{suffix}"));
    std::fs::create_dir_all(root.as_path()).expect("temp test root must be creatable");
    let store = Arc::new(LearningStore::new(root.join("var/backend/tutor.db")));
    store.initialize().expect("store should initialize");
    let seed = store.seed_demo().expect("demo seed");
    let app = build_router(
        AppState::with_planner(store, Arc::new(ScriptedPlanner::unconfigured()))
            .with_dev_student(Some(seed.student_id)),
    );

    for route in route_catalog() {
        let request = Request::builder()
            .method(to_http_method(route.spec.method))
            .uri(route.spec.path.as_str())
            .header("content-type", "application/json")
            .body(request_body(route.spec.method))
            .expect("request should build");

        let response = app
            .clone()
            .oneshot(request)
            .await
            .expect("router should return response");

        let expected = expected_status(route.spec.method, route.spec.path.as_str());
        assert_eq!(
            response.status(),
            expected,
            "unexpected status for {} {}",
            route.spec.method,
            route.spec.path
        );
    }
}

fn to_http_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
    }
}

fn request_body(method: HttpMethod) -> Body {
    match method {
        HttpMethod::Post => Body::from("{}"),
        HttpMethod::Get => Body::empty(),
    }
}

fn expected_status(method: HttpMethod, path: &str) -> StatusCode {
    match (method, path) {
        // An empty turn has no user message.
        (HttpMethod::Post, "/tutor") => StatusCode::BAD_REQUEST,
        _ => StatusCode::OK,
    }
}
