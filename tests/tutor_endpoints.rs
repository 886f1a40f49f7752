use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use tutor_backend_core::api::server::{build_router, AppState};
use tutor_backend_core::db::learning::{LearningStore, SharedLearningStore};
use tutor_backend_core::tutor::planner::{ScriptStep, ScriptedPlanner};

#[tokio::test]
async fn arabic_homework_request_previews_then_creates_after_yes() {
    let store = test_store();
    let seed = store.seed_demo().expect("demo seed");
    let token = store
        .issue_access_token(seed.student_id.as_str(), Some("test"))
        .expect("token")
        .token;
    let homework_input = json!({"subject": "math", "difficulty_level": "easy", "topic": "addition"});
    let planner = ScriptedPlanner::turns(vec![
        vec![
            ScriptStep::text("هذه معاينة الواجب. "),
            ScriptStep::call("create_homework_assignment", homework_input.clone()),
            ScriptStep::text("هل توافقين؟"),
        ],
        vec![
            ScriptStep::call("create_homework_assignment", homework_input),
            ScriptStep::text("تم إنشاء الواجب."),
        ],
    ]);
    let app = build_router(AppState::with_planner(Arc::clone(&store), Arc::new(planner)));

    let first_turn = json!({
        "messages": [{"id": "u1", "role": "user", "parts": [{"type": "text", "text": "أريد واجبًا في الجمع"}]}]
    });
    let (status, events) = send_turn(app.clone(), first_turn, token.as_str()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(events.first().map(|e| e["type"].clone()), Some(json!("start")));
    let draft = tool_output(&events, "create_homework_assignment");
    assert_eq!(draft["status"], "draft");
    assert_eq!(draft["needs_confirmation"], true);
    assert_eq!(draft["question_count"], 5);
    let conversation_id = finish_conversation_id(&events);
    assert_eq!(
        store
            .list_student_homework(seed.student_id.as_str(), None, 20)
            .expect("homework")
            .len(),
        0
    );

    let second_turn = json!({
        "conversation_id": conversation_id,
        "messages": [
            {"id": "u1", "role": "user", "parts": [{"type": "text", "text": "أريد واجبًا في الجمع"}]},
            {"id": "a1", "role": "assistant", "parts": [
                {"type": "step-start"},
                {"type": "text", "text": "هذه معاينة الواجب. هل توافقين؟"},
                {"type": "tool-create_homework_assignment", "toolCallId": "c1", "state": "output-available", "input": {}, "output": draft}
            ]},
            {"id": "u2", "role": "user", "parts": [{"type": "text", "text": "نعم"}]}
        ]
    });
    let (status, events) = send_turn(app.clone(), second_turn, token.as_str()).await;
    assert_eq!(status, StatusCode::OK);
    let created = tool_output(&events, "create_homework_assignment");
    assert_eq!(created["status"], "created", "{created}");
    assert_eq!(finish_conversation_id(&events), conversation_id);

    let homework = store
        .list_student_homework(seed.student_id.as_str(), None, 20)
        .expect("homework");
    assert_eq!(homework.len(), 1);
    assert_eq!(homework[0].total_points, 50);
    assert_eq!(homework[0].status, "not_started");

    let (status, history) = send_json(
        app.clone(),
        Method::GET,
        format!("/tutor?conversation_id={conversation_id}").as_str(),
        Body::empty(),
        Some(token.as_str()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let roles = history["messages"]
        .as_array()
        .expect("messages")
        .iter()
        .map(|m| m["role"].as_str().unwrap_or_default().to_string())
        .collect::<Vec<_>>();
    assert_eq!(roles, vec!["user", "assistant", "user", "assistant"]);
    assert_eq!(history["messages"][2]["content"], "نعم");
    assert_eq!(
        history["messages"][3]["tool_parts"][0]["type"],
        "tool-create_homework_assignment"
    );

    let (status, list) =
        send_json(app, Method::GET, "/tutor", Body::empty(), Some(token.as_str())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["count"], 1);
    assert_eq!(list["conversations"][0]["title"], "أريد واجبًا في الجمع");
}

#[tokio::test]
async fn failed_planner_turn_streams_error_and_keeps_history_empty() {
    let store = test_store();
    let seed = store.seed_demo().expect("demo seed");
    let planner = ScriptedPlanner::new(vec![
        ScriptStep::text("Let me look"),
        ScriptStep::Fail(String::from("upstream timeout")),
    ]);
    let app = build_router(
        AppState::with_planner(Arc::clone(&store), Arc::new(planner))
            .with_dev_student(Some(seed.student_id.clone())),
    );

    let (status, events) = send_turn_without_auth(
        app,
        json!({"language": "en", "messages": [{"role": "user", "content": "hello"}]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let last = events.last().expect("events");
    assert_eq!(last["type"], "error");
    assert!(!last["errorText"]
        .as_str()
        .unwrap_or_default()
        .contains("upstream timeout"));

    let conversations = store
        .list_conversations(seed.student_id.as_str(), 10)
        .expect("conversations");
    assert_eq!(conversations.len(), 1);
    assert_eq!(
        events[0]["messageMetadata"]["conversation_id"],
        conversations[0].id.as_str()
    );
    assert!(store
        .list_messages(conversations[0].id.as_str())
        .expect("messages")
        .is_empty());
}

#[tokio::test]
async fn invalid_turns_are_rejected_before_streaming() {
    let store = test_store();
    let seed = store.seed_demo().expect("demo seed");
    let app = build_router(
        AppState::with_planner(
            Arc::clone(&store),
            Arc::new(ScriptedPlanner::new(vec![ScriptStep::text("hi")])),
        )
        .with_dev_student(Some(seed.student_id)),
    );

    let (status, body) = send_json(
        app.clone(),
        Method::POST,
        "/tutor",
        Body::from(r#"{"messages": []}"#),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "invalid_request");

    let (status, body) = send_json(
        app.clone(),
        Method::POST,
        "/tutor",
        Body::from(
            json!({
                "conversation_id": "someone-elses",
                "messages": [{"role": "user", "content": "hi"}]
            })
            .to_string(),
        ),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Conversation not found");
    assert_eq!(body["error_code"], "conversation_not_found");

    let (status, body) = send_json(
        app.clone(),
        Method::GET,
        "/tutor?conversation_id=someone-elses",
        Body::empty(),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "conversation_not_found");

    let (status, body) = send_json(
        app,
        Method::POST,
        "/tutor",
        Body::from(
            json!({"language": "fr", "messages": [{"role": "user", "content": "salut"}]}).to_string(),
        ),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_kind"], "validation");
}

#[tokio::test]
async fn tool_catalog_is_listed() {
    let store = test_store();
    let seed = store.seed_demo().expect("demo seed");
    let app = build_router(
        AppState::with_planner(Arc::clone(&store), Arc::new(ScriptedPlanner::unconfigured()))
            .with_dev_student(Some(seed.student_id)),
    );
    let (status, body) = send_json(app, Method::GET, "/tutor/tools", Body::empty(), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 14);
    assert_eq!(body["tools"][13]["name"], "create_homework_assignment");
    assert_eq!(body["tools"][13]["parameters"]["type"], "object");
}

fn tool_output(events: &[Value], tool_name: &str) -> Value {
    let call_id = events
        .iter()
        .find(|e| e["type"] == "tool-input-available" && e["toolName"] == tool_name)
        .and_then(|e| e["toolCallId"].as_str())
        .expect("tool call should be announced")
        .to_string();
    events
        .iter()
        .find(|e| e["type"] == "tool-output-available" && e["toolCallId"] == call_id.as_str())
        .map(|e| e["output"].clone())
        .expect("tool output should be streamed")
}

fn finish_conversation_id(events: &[Value]) -> String {
    let finish = events.last().expect("events");
    assert_eq!(finish["type"], "finish", "{events:?}");
    finish["messageMetadata"]["conversation_id"]
        .as_str()
        .expect("conversation id")
        .to_string()
}

async fn send_turn(app: axum::Router, body: Value, bearer_token: &str) -> (StatusCode, Vec<Value>) {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/tutor")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {bearer_token}"))
        .body(Body::from(body.to_string()))
        .expect("request should build");
    read_events(app, request).await
}

async fn send_turn_without_auth(app: axum::Router, body: Value) -> (StatusCode, Vec<Value>) {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/tutor")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");
    read_events(app, request).await
}

async fn read_events(app: axum::Router, request: Request<Body>) -> (StatusCode, Vec<Value>) {
    let response = app
        .oneshot(request)
        .await
        .expect("router should return response");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    let text = String::from_utf8(body.to_vec()).expect("stream should be UTF-8");
    let events = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| *data != "[DONE]")
        .map(|data| serde_json::from_str::<Value>(data).expect("event should be JSON"))
        .collect();
    (status, events)
}

async fn send_json(
    app: axum::Router,
    method: Method,
    uri: &str,
    body: Body,
    bearer_token: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = bearer_token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = builder.body(body).expect("request should build");

    let response = app
        .oneshot(request)
        .await
        .expect("router should return response");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    let parsed = serde_json::from_slice(body.as_ref()).expect("response should be valid JSON");
    (status, parsed)
}

fn test_store() -> SharedLearningStore {
    let suffix = Uuid::new_v4().to_string();
    let root = std::env::temp_dir().join(format!("tutor_endpoints_test_{suffix}"));
    std::fs::create_dir_all(root.as_path()).expect("temp test root must be creatable");
    let store = Arc::new(LearningStore::new(root.join("var/backend/tutor.db")));
    store.initialize().expect("store should initialize");
    store
}
