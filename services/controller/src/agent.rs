//! Pushing the load-balancer model to edge agents.

use std::time::Duration;

use async_trait::async_trait;
use lbaas_model::LoadBalancer;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PushError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// At least one agent did not accept the model.
    #[error("{} of {total} agents failed: {}", .failures.len(), .failures.join("; "))]
    Agents { total: usize, failures: Vec<String> },
}

/// Delivers the load-balancer model to the agents that apply it.
#[async_trait]
pub trait ConfigPusher: Send + Sync {
    async fn push_config(&self, model: &LoadBalancer) -> Result<(), PushError>;
}

/// Posts the JSON model to `{agent}/v1/apply` on every configured agent.
#[derive(Debug, Clone)]
pub struct HttpAgentPusher {
    client: reqwest::Client,
    agents: Vec<String>,
}

impl HttpAgentPusher {
    pub fn new(agents: Vec<String>, timeout: Duration) -> Result<Self, PushError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("lbaas-controller/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(PushError::Client)?;

        Ok(Self { client, agents })
    }

    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    async fn push_one(&self, base_url: &str, model: &LoadBalancer) -> Result<(), String> {
        let base = base_url.trim_end_matches('/');
        let url = format!("{base}/v1/apply");

        let resp = self
            .client
            .post(&url)
            .json(model)
            .send()
            .await
            .map_err(|e| format!("{url}: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("{url}: status={status}: {body}"));
        }

        Ok(())
    }
}

#[async_trait]
impl ConfigPusher for HttpAgentPusher {
    async fn push_config(&self, model: &LoadBalancer) -> Result<(), PushError> {
        let mut failures = Vec::new();
        for agent in &self.agents {
            match self.push_one(agent, model).await {
                Ok(()) => debug!(agent = %agent, forwards = model.forward_count(), "pushed config"),
                Err(e) => {
                    warn!(agent = %agent, error = %e, "config push failed");
                    failures.push(e);
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PushError::Agents {
                total: self.agents.len(),
                failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use lbaas_model::{IngressIp, PortForward, Protocol};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn model() -> LoadBalancer {
        LoadBalancer {
            ingress: vec![IngressIp {
                address: "10.0.0.1".to_string(),
                ports: vec![PortForward {
                    protocol: Protocol::Tcp,
                    inbound_port: 80,
                    destination_addresses: vec!["192.168.0.1".to_string()],
                    destination_port: 30080,
                    balance_policy: String::new(),
                }],
            }],
        }
    }

    #[tokio::test]
    async fn test_push_posts_model_to_every_agent() {
        let first = MockServer::start().await;
        let second = MockServer::start().await;
        for server in [&first, &second] {
            Mock::given(method("POST"))
                .and(path("/v1/apply"))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(server)
                .await;
        }

        let pusher = HttpAgentPusher::new(
            vec![first.uri(), format!("{}/", second.uri())],
            Duration::from_secs(2),
        )
        .unwrap();
        pusher.push_config(&model()).await.unwrap();

        let requests = first.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["ingress"][0]["ports"][0]["inbound-port"], 80);
    }

    #[tokio::test]
    async fn test_push_aggregates_failures() {
        let healthy = MockServer::start().await;
        let broken = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&healthy)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("draining"))
            .mount(&broken)
            .await;

        let pusher =
            HttpAgentPusher::new(vec![healthy.uri(), broken.uri()], Duration::from_secs(2))
                .unwrap();
        let err = pusher.push_config(&model()).await.unwrap_err();

        match err {
            PushError::Agents { total, failures } => {
                assert_eq!(total, 2);
                assert_eq!(failures.len(), 1);
                assert!(failures[0].contains("503"));
                assert!(failures[0].contains("draining"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
