use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use sessionflow_core::decode_event;
use sessionflow_events::{Job, QueueSink};
use sessionflow_infra::config::SessionflowConfig;
use sessionflow_infra::external::{
    ActionActivity, ActivityEmitter, ActivityError, ResponseActivity, SessionExternalUrls,
    ThoughtActivity,
};
use sessionflow_infra::queue::JsonlQueue;
use sessionflow_infra::workers::{CursorStore, FileCursorStore};
use sessionflow_worker::service::{build_processor, run_with};
use sessionflow_worker::{AgentOutcome, AgentRequest, AgentRunner};

#[derive(Default)]
struct RecordingActivities {
    entries: Mutex<Vec<(String, String)>>,
}

impl RecordingActivities {
    fn record(&self, kind: &str, key: &str) -> String {
        let mut entries = self.entries.lock().unwrap();
        entries.push((kind.to_string(), key.to_string()));
        format!("activity-{}", entries.len())
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActivityEmitter for RecordingActivities {
    async fn emit_thought(
        &self,
        _ctx: &CancellationToken,
        input: &ThoughtActivity,
    ) -> Result<String, ActivityError> {
        Ok(self.record("thought", &input.idempotency_key))
    }

    async fn emit_action(
        &self,
        _ctx: &CancellationToken,
        input: &ActionActivity,
    ) -> Result<String, ActivityError> {
        Ok(self.record("action", &input.idempotency_key))
    }

    async fn emit_response(
        &self,
        _ctx: &CancellationToken,
        input: &ResponseActivity,
    ) -> Result<String, ActivityError> {
        Ok(self.record("response", &input.idempotency_key))
    }

    async fn update_session_external_urls(
        &self,
        _ctx: &CancellationToken,
        input: &SessionExternalUrls,
    ) -> Result<(), ActivityError> {
        self.record("urls", &input.session_id);
        Ok(())
    }
}

#[derive(Default)]
struct EchoAgent {
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl AgentRunner for EchoAgent {
    async fn run(
        &self,
        _ctx: &CancellationToken,
        request: &AgentRequest,
    ) -> anyhow::Result<AgentOutcome> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        Ok(AgentOutcome::completed())
    }
}

fn job(body: serde_json::Value) -> Job {
    let raw = body.to_string();
    let event = decode_event(raw.as_bytes()).unwrap();
    Job::from_delivery(event, raw.as_bytes(), None, Utc::now()).unwrap()
}

fn created(id: &str) -> Job {
    job(json!({
        "id": id,
        "type": "AgentSessionEvent",
        "action": "created",
        "payloadVersion": 1,
        "agentSession": {
            "id": "session-1",
            "state": "pending",
            "promptContext": "<issue identifier=\"ENG-7\">Broken build</issue>",
            "comment": { "id": "c-1", "body": "please look" }
        }
    }))
}

fn prompted(id: &str) -> Job {
    job(json!({
        "id": id,
        "type": "AgentSessionEvent",
        "action": "prompted",
        "payloadVersion": 1,
        "agentSession": { "id": "session-1", "state": "awaitingInput" },
        "agentActivity": {
            "id": "act-2",
            "content": { "type": "prompt", "body": "now the docs" }
        }
    }))
}

#[tokio::test]
async fn drains_queue_once_and_reports_every_step() {
    let dir = tempfile::tempdir().unwrap();
    let queue_path = dir.path().join("jobs.jsonl");
    let queue = JsonlQueue::new(&queue_path);
    let ctx = CancellationToken::new();

    // Redelivery of evt-1 carries the same idempotency key and must run once.
    for job in [created("evt-1"), created("evt-1"), prompted("evt-2")] {
        queue.enqueue(&ctx, &job).await.unwrap();
    }

    let activities = Arc::new(RecordingActivities::default());
    let agent = Arc::new(EchoAgent::default());
    let config = SessionflowConfig {
        queue_path: queue_path.clone(),
        once: true,
        ..SessionflowConfig::default()
    };
    let processor = build_processor(activities.clone(), agent.clone(), config.sla_config());

    run_with(&config, processor, &ctx).await.unwrap();

    let created_key = "agent-session/v1:session-1:created";
    let prompted_key = "agent-session/v1:session-1:prompted:act-2";
    let expected: Vec<(String, String)> = [
        ("thought", format!("{created_key}:thought")),
        ("response", format!("{created_key}:response")),
        ("thought", format!("{prompted_key}:thought")),
        ("response", format!("{prompted_key}:response")),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    assert_eq!(activities.entries(), expected);

    let prompts = agent.prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].ends_with("Initial request:\nplease look"));
    assert!(prompts[1].contains("Follow-up input:\nnow the docs"));

    let queue_len = std::fs::metadata(&queue_path).unwrap().len();
    let cursor = FileCursorStore::for_queue(&queue_path);
    assert_eq!(cursor.load().await.unwrap(), queue_len);
}

#[tokio::test]
async fn restart_resumes_after_the_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let queue_path = dir.path().join("jobs.jsonl");
    let queue = JsonlQueue::new(&queue_path);
    let ctx = CancellationToken::new();
    let config = SessionflowConfig {
        queue_path: queue_path.clone(),
        once: true,
        ..SessionflowConfig::default()
    };

    queue.enqueue(&ctx, &prompted("evt-1")).await.unwrap();
    let first = Arc::new(RecordingActivities::default());
    let processor = build_processor(
        first.clone(),
        Arc::new(EchoAgent::default()),
        config.sla_config(),
    );
    run_with(&config, processor, &ctx).await.unwrap();
    assert_eq!(first.entries().len(), 2);

    queue.enqueue(&ctx, &created("evt-2")).await.unwrap();
    let second = Arc::new(RecordingActivities::default());
    let processor = build_processor(
        second.clone(),
        Arc::new(EchoAgent::default()),
        config.sla_config(),
    );
    run_with(&config, processor, &ctx).await.unwrap();

    let keys: Vec<String> = second.entries().into_iter().map(|(_, key)| key).collect();
    assert_eq!(
        keys,
        vec![
            "agent-session/v1:session-1:created:thought".to_string(),
            "agent-session/v1:session-1:created:response".to_string(),
        ]
    );
}
