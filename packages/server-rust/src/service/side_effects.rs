//! Declared side effects, run after an action succeeds.
//!
//! Nothing here can fail the dispatch: emits cannot fail, notifications are
//! log lines, and webhooks are delivered on a spawned task whose errors are
//! logged and dropped.

use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use stencil_core::{Caller, SideEffect};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::{Event, EventBus};

#[derive(Debug, Clone)]
pub struct SideEffectRunner {
    client: reqwest::Client,
    events: EventBus,
    webhook_timeout: Duration,
}

impl SideEffectRunner {
    #[must_use]
    pub fn new(events: EventBus, webhook_timeout_ms: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            events,
            webhook_timeout: Duration::from_millis(webhook_timeout_ms),
        }
    }

    /// Runs every effect in declaration order without waiting on delivery.
    pub fn run(&self, action: &str, effects: &[SideEffect], result: &Value, caller: &Caller) {
        for effect in effects {
            match effect {
                SideEffect::Emit { event } => {
                    self.events
                        .emit(Event::new(event, caller.tenant_id.clone(), result.clone()));
                }
                SideEffect::Notify { message } => {
                    info!(
                        target: "stencil::notify",
                        action,
                        tenant = %caller.tenant_id,
                        user = %caller.user_id,
                        "{message}"
                    );
                }
                SideEffect::Webhook { url } => {
                    self.spawn_webhook(action, url, result, caller);
                }
            }
        }
    }

    /// The handle resolves to whether the endpoint answered with a success
    /// status. Callers never wait on it.
    fn spawn_webhook(
        &self,
        action: &str,
        url: &str,
        result: &Value,
        caller: &Caller,
    ) -> JoinHandle<bool> {
        let body = json!({
            "action": action,
            "tenantId": caller.tenant_id,
            "result": result,
            "timestamp": Utc::now(),
        });
        let request = self
            .client
            .post(url)
            .timeout(self.webhook_timeout)
            .json(&body);
        let action = action.to_string();
        let url = url.to_string();

        tokio::spawn(async move {
            match request.send().await.and_then(reqwest::Response::error_for_status) {
                Ok(response) => {
                    debug!(%action, %url, status = %response.status(), "webhook delivered");
                    true
                }
                Err(err) => {
                    warn!(%action, %url, error = %err, "webhook delivery failed");
                    false
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_effect_publishes_result() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let runner = SideEffectRunner::new(bus, 100);
        runner.run(
            "task.create",
            &[SideEffect::Emit {
                event: "task.created".into(),
            }],
            &json!({"id": "1"}),
            &Caller::human("u1", "t1"),
        );
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "task.created");
        assert_eq!(event.tenant_id, "t1");
        assert_eq!(event.payload, json!({"id": "1"}));
    }

    #[tokio::test]
    async fn unreachable_webhook_does_not_fail_the_caller() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let runner = SideEffectRunner::new(bus, 50);
        let caller = Caller::human("u1", "t1");
        runner.run(
            "task.create",
            &[
                SideEffect::Webhook {
                    url: "http://127.0.0.1:9/hook".into(),
                },
                SideEffect::Notify {
                    message: "task created".into(),
                },
                SideEffect::Emit {
                    event: "task.created".into(),
                },
            ],
            &json!({"id": "1"}),
            &caller,
        );
        // Effects after the webhook still run, without waiting on delivery.
        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, "task.created");

        let delivered = tokio::time::timeout(
            Duration::from_secs(5),
            runner.spawn_webhook("task.create", "http://127.0.0.1:9/hook", &json!({}), &caller),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!delivered);
    }

    /// Accepts one connection, answers 200 and returns the request body.
    async fn one_shot_endpoint() -> (String, JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0_u8; 1024];
            let body = loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some((head, body)) = text.split_once("\r\n\r\n") {
                    let length = head
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if body.len() >= length {
                        break body.to_string();
                    }
                }
                assert!(n > 0, "connection closed before the body arrived");
            };
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            body
        });
        (url, server)
    }

    #[tokio::test]
    async fn webhook_posts_action_tenant_and_result() {
        let (url, server) = one_shot_endpoint().await;
        let runner = SideEffectRunner::new(EventBus::new(8), 2_000);
        let delivered = runner
            .spawn_webhook("task.create", &url, &json!({"id": "1"}), &Caller::human("u1", "t1"))
            .await
            .unwrap();
        assert!(delivered);

        let body: Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(body["action"], json!("task.create"));
        assert_eq!(body["tenantId"], json!("t1"));
        assert_eq!(body["result"], json!({"id": "1"}));
        assert!(body["timestamp"].is_string());
    }
}
