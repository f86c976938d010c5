use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Method, StatusCode};
use tracing::warn;

use crate::error::{Result, StormApiError};
use crate::metrics::ApiMetrics;
use crate::model::{ClusterSummary, TopologyInfo, TopologyMetrics, TopologySummaryList};

#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Synchronous (request/response, not streaming) client for the subset of
/// the Nimbus/UI REST API the operator needs. Every call carries an
/// explicit deadline; transport failures, timeouts and HTTP status codes are
/// classified into [`StormApiError`] by [`StormApiError::from_response`].
#[derive(Clone)]
pub struct StormApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
    metrics: Option<Arc<ApiMetrics>>,
}

impl StormApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            credentials: None,
            metrics: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ApiMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut req = self.http.request(method, url);
        if let Some(creds) = &self.credentials {
            req = req.basic_auth(&creds.username, Some(&creds.password));
        }
        req
    }

    async fn send(
        &self,
        method: Method,
        endpoint: &'static str,
        path: &str,
        deadline: Duration,
        not_found_bodies: &[&str],
    ) -> Result<reqwest::Response> {
        self.send_with_body(method, endpoint, path, deadline, not_found_bodies, None)
            .await
    }

    async fn send_with_body(
        &self,
        method: Method,
        endpoint: &'static str,
        path: &str,
        deadline: Duration,
        not_found_bodies: &[&str],
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let start = Instant::now();
        let method_label = method.to_string();
        let mut req = self.request(method, path);
        if let Some(body) = body {
            req = req.json(body);
        }
        let result = tokio::time::timeout(deadline, req.send()).await;
        let outcome = match result {
            Err(_) => Err(StormApiError::Connection(format!(
                "request to {path} timed out after {:?}",
                deadline
            ))),
            Ok(Err(e)) => Err(StormApiError::from(e)),
            Ok(Ok(resp)) => {
                let status = resp.status();
                if status.is_success() {
                    Ok(resp)
                } else {
                    let body = resp.text().await.unwrap_or_default();
                    let is_not_found = not_found_bodies.iter().any(|needle| body.contains(needle));
                    Err(StormApiError::from_response(status, body, is_not_found))
                }
            }
        };
        if let Some(metrics) = &self.metrics {
            let status = match &outcome {
                Ok(resp) => resp.status().as_u16(),
                Err(StormApiError::NotFound(_)) => StatusCode::NOT_FOUND.as_u16(),
                Err(StormApiError::Auth(s)) => *s,
                Err(StormApiError::Transient { status, .. }) => *status,
                Err(StormApiError::Permanent { status, .. }) => *status,
                Err(_) => 0,
            };
            metrics.observe(&method_label, endpoint, status, start.elapsed().as_secs_f64());
        }
        outcome
    }

    pub async fn get_cluster_info(&self, deadline: Duration) -> Result<ClusterSummary> {
        let resp = self
            .send(Method::GET, "cluster_summary", "/api/v1/cluster/summary", deadline, &[])
            .await?;
        Ok(resp.json().await?)
    }

    pub async fn list_topologies(&self, deadline: Duration) -> Result<TopologySummaryList> {
        let resp = self
            .send(
                Method::GET,
                "topology_summary",
                "/api/v1/topology/summary",
                deadline,
                &[],
            )
            .await?;
        Ok(resp.json().await?)
    }

    pub async fn get_topology(&self, id: &str, deadline: Duration) -> Result<TopologyInfo> {
        let path = format!("/api/v1/topology/{id}");
        let resp = self
            .send(Method::GET, "topology", &path, deadline, &["does not exist", "Could not find"])
            .await?;
        Ok(resp.json().await?)
    }

    pub async fn get_topology_metrics(&self, id: &str, deadline: Duration) -> Result<TopologyMetrics> {
        let path = format!("/api/v1/topology/{id}");
        let resp = self
            .send(Method::GET, "topology", &path, deadline, &["does not exist", "Could not find"])
            .await?;
        Ok(resp.json().await?)
    }

    /// Uploads `jar_path` and submits it under `name`. If Nimbus reports the
    /// name is already registered, that is treated as success per the
    /// idempotent-submission invariant.
    pub async fn submit_topology(
        &self,
        name: &str,
        jar_path: &Path,
        main_class: &str,
        args: &[String],
        config: &std::collections::BTreeMap<String, String>,
        deadline: Duration,
    ) -> Result<String> {
        let jar_bytes = tokio::fs::read(jar_path)
            .await
            .map_err(|e| StormApiError::Permanent {
                status: 0,
                body: format!("failed to read jar at {}: {e}", jar_path.display()),
            })?;
        let file_name = jar_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "topology.jar".to_string());
        let part = reqwest::multipart::Part::bytes(jar_bytes)
            .file_name(file_name)
            .mime_str("application/java-archive")
            .map_err(|e| StormApiError::Permanent {
                status: 0,
                body: e.to_string(),
            })?;
        let form = reqwest::multipart::Form::new()
            .text("name", name.to_string())
            .text("mainClass", main_class.to_string())
            .text("args", args.join(" "))
            .text(
                "config",
                serde_json::to_string(config).unwrap_or_default(),
            )
            .part("jar", part);

        let url = format!("{}/api/v1/topology/submit", self.base_url.trim_end_matches('/'));
        let start = Instant::now();
        let mut req = self.http.post(url).multipart(form);
        if let Some(creds) = &self.credentials {
            req = req.basic_auth(&creds.username, Some(&creds.password));
        }
        let result = tokio::time::timeout(deadline, req.send()).await;
        let already_registered_needle = "already exists";
        let outcome: Result<String> = match result {
            Err(_) => Err(StormApiError::Connection(format!(
                "submit request for {name} timed out"
            ))),
            Ok(Err(e)) => Err(StormApiError::from(e)),
            Ok(Ok(resp)) => {
                let status = resp.status();
                if status.is_success() {
                    let body: crate::model::SubmitTopologyResponse = resp.json().await?;
                    Ok(body.topology_id)
                } else {
                    let body = resp.text().await.unwrap_or_default();
                    if body.contains(already_registered_needle) {
                        Ok(name.to_string())
                    } else {
                        Err(StormApiError::from_response(status, body, false))
                    }
                }
            }
        };
        if let Some(metrics) = &self.metrics {
            let status = outcome.as_ref().map(|_| 200u16).unwrap_or(0);
            metrics.observe("POST", "topology_submit", status, start.elapsed().as_secs_f64());
        }
        outcome
    }

    pub async fn kill_topology(&self, name: &str, wait_secs: i64, deadline: Duration) -> Result<()> {
        let path = format!("/api/v1/topology/{name}/kill/{wait_secs}");
        match self
            .send(Method::POST, "topology_kill", &path, deadline, &["does not exist"])
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                warn!(topology = name, "kill request found no registered topology, treating as success");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn activate_topology(&self, name: &str, deadline: Duration) -> Result<()> {
        let path = format!("/api/v1/topology/{name}/activate");
        self.send(Method::POST, "topology_activate", &path, deadline, &[])
            .await
            .map(|_| ())
    }

    pub async fn deactivate_topology(&self, name: &str, deadline: Duration) -> Result<()> {
        let path = format!("/api/v1/topology/{name}/deactivate");
        self.send(Method::POST, "topology_deactivate", &path, deadline, &[])
            .await
            .map(|_| ())
    }

    /// `componentParallelism` names the new executor count per component;
    /// Nimbus's rebalance endpoint takes this as an `executors` JSON object
    /// in the request body, mirroring the Storm UI REST API.
    pub async fn rebalance_topology(
        &self,
        name: &str,
        wait_secs: i64,
        num_workers: Option<i32>,
        component_parallelism: &std::collections::BTreeMap<String, i32>,
        deadline: Duration,
    ) -> Result<()> {
        let mut path = format!("/api/v1/topology/{name}/rebalance/{wait_secs}");
        if let Some(workers) = num_workers {
            path.push_str(&format!("?workers={workers}"));
        }
        let body = (!component_parallelism.is_empty())
            .then(|| serde_json::json!({ "executors": component_parallelism }));
        self.send_with_body(Method::POST, "topology_rebalance", &path, deadline, &[], body.as_ref())
            .await
            .map(|_| ())
    }
}
