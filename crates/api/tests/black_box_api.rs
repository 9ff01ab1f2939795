use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use sessionflow_api::app::{WebhookConfig, build_app, services};
use sessionflow_events::{Dispatcher, Job};
use sessionflow_infra::config::SessionflowConfig;
use sessionflow_infra::dispatcher::AsyncDispatcher;

struct TestServer {
    base_url: String,
    dispatcher: Arc<AsyncDispatcher>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(config: &SessionflowConfig) -> Self {
        // Same wiring as prod, bound to an ephemeral port.
        let dispatcher = services::build_dispatcher(config);
        let app = build_app(
            Some(dispatcher.clone() as Arc<dyn Dispatcher>),
            WebhookConfig::from_config(config),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            dispatcher,
            handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn prompted_event(id: &str, activity: &str) -> serde_json::Value {
    json!({
        "id": id,
        "type": "AgentSessionEvent",
        "action": "prompted",
        "payloadVersion": 1,
        "agentSession": { "id": "session-9", "state": "awaitingInput" },
        "agentActivity": {
            "id": activity,
            "content": { "type": "prompt", "body": "Also update the changelog" }
        }
    })
}

#[tokio::test]
async fn accepted_webhooks_are_durably_queued_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let queue_path = dir.path().join("runner-logs").join("jobs.jsonl");
    let config = SessionflowConfig {
        queue_path: queue_path.clone(),
        ..SessionflowConfig::default()
    };
    let srv = TestServer::spawn(&config).await;
    let client = reqwest::Client::new();

    for (id, activity) in [("evt-1", "act-1"), ("evt-2", "act-2"), ("evt-3", "act-3")] {
        let res = client
            .post(format!("{}/linear/webhook", srv.base_url))
            .header("X-Linear-Delivery-ID", format!("delivery-{id}"))
            .json(&prompted_event(id, activity))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["jobId"], id);
    }

    srv.dispatcher.close(&CancellationToken::new()).await.unwrap();

    let raw = std::fs::read(&queue_path).unwrap();
    let jobs: Vec<Job> = raw
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| Job::decode_line(line).unwrap())
        .collect();

    let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec!["evt-1", "evt-2", "evt-3"]);
    assert_eq!(
        jobs[0].idempotency_key,
        "agent-session/v1:session-9:prompted:act-1"
    );
    assert_eq!(jobs[2].delivery_id.as_deref(), Some("delivery-evt-3"));
    assert_eq!(srv.dispatcher.stats().written, 3);
}

#[tokio::test]
async fn health_and_method_guard_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let config = SessionflowConfig {
        queue_path: dir.path().join("jobs.jsonl"),
        ..SessionflowConfig::default()
    };
    let srv = TestServer::spawn(&config).await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/health", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .put(format!("{}/linear/webhook", srv.base_url))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.headers()["allow"], "POST");
    assert!(!dir.path().join("jobs.jsonl").exists());
}
