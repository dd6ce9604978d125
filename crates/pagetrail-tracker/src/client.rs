use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;

use pagetrail_core::ingest::IngestionService;
use pagetrail_core::visit::{
    BeginVisitRequest, IngestAck, ReconcileVisitsRequest, UpdateVisitRequest,
};

use crate::machine::TrackerCommand;

/// Transport for the three ingestion operations.
///
/// An `Err` means the call never produced an answer (network, timeout,
/// non-2xx). A rejected request is still `Ok(IngestAck { ok: false })`.
#[async_trait]
pub trait IngestClient: Send + Sync + 'static {
    async fn begin_visit(&self, req: &BeginVisitRequest) -> Result<IngestAck>;
    async fn update_visit(&self, req: &UpdateVisitRequest) -> Result<IngestAck>;
    async fn reconcile_stale_visits(&self, req: &ReconcileVisitsRequest) -> Result<IngestAck>;
}

pub async fn send_command(client: &dyn IngestClient, command: &TrackerCommand) -> Result<IngestAck> {
    match command {
        TrackerCommand::Begin(req) => client.begin_visit(req).await,
        TrackerCommand::Update(req) => client.update_visit(req).await,
        TrackerCommand::Reconcile(req) => client.reconcile_stale_visits(req).await,
    }
}

/// In-process transport, used when tracker and service share a binary.
#[async_trait]
impl IngestClient for IngestionService {
    async fn begin_visit(&self, req: &BeginVisitRequest) -> Result<IngestAck> {
        Ok(IngestionService::begin_visit(self, req).await)
    }

    async fn update_visit(&self, req: &UpdateVisitRequest) -> Result<IngestAck> {
        Ok(IngestionService::update_visit(self, req).await)
    }

    async fn reconcile_stale_visits(&self, req: &ReconcileVisitsRequest) -> Result<IngestAck> {
        Ok(IngestionService::reconcile_stale_visits(self, req).await)
    }
}

/// Posts JSON to `POST {base_url}/api/visits/{begin,update,reconcile}`.
///
/// The base URL may carry a path prefix (`https://host/analytics`); a
/// trailing slash is added so endpoint paths resolve beneath it.
#[derive(Clone)]
pub struct HttpIngestClient {
    client: Client,
    base_url: Url,
}

impl HttpIngestClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(base_url).context("Invalid ingestion base URL")?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(5))
            .build()
            .context("ingestion client build failed")?;
        Ok(Self { client, base_url })
    }

    /// `path` is relative (no leading slash) so the base path is kept.
    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Invalid ingestion path {path}"))
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<IngestAck> {
        let url = self.endpoint(path)?;
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("ingestion request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("ingestion error {status}: {body}");
        }

        resp.json::<IngestAck>()
            .await
            .context("ingestion response parse failed")
    }
}

#[async_trait]
impl IngestClient for HttpIngestClient {
    async fn begin_visit(&self, req: &BeginVisitRequest) -> Result<IngestAck> {
        self.post("api/visits/begin", req).await
    }

    async fn update_visit(&self, req: &UpdateVisitRequest) -> Result<IngestAck> {
        self.post("api/visits/update", req).await
    }

    async fn reconcile_stale_visits(&self, req: &ReconcileVisitsRequest) -> Result<IngestAck> {
        self.post("api/visits/reconcile", req).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pagetrail_core::analytics::AggregationConfig;
    use pagetrail_core::memory::InMemoryVisitStore;
    use pagetrail_core::routes::RouteAllowList;
    use pagetrail_core::visit::Device;

    use super::*;

    #[test]
    fn http_client_rejects_malformed_base_url() {
        assert!(HttpIngestClient::new("not a url").is_err());
        assert!(HttpIngestClient::new("http://127.0.0.1:3000").is_ok());
    }

    #[test]
    fn endpoints_resolve_beneath_base_path() {
        for base in ["https://example.com/analytics", "https://example.com/analytics/"] {
            let client = HttpIngestClient::new(base).expect("client");
            assert_eq!(
                client.endpoint("api/visits/update").expect("url").as_str(),
                "https://example.com/analytics/api/visits/update"
            );
        }

        let root = HttpIngestClient::new("http://127.0.0.1:3000").expect("client");
        assert_eq!(
            root.endpoint("api/visits/begin").expect("url").as_str(),
            "http://127.0.0.1:3000/api/visits/begin"
        );
    }

    #[tokio::test]
    async fn commands_dispatch_to_matching_operation() {
        let service = IngestionService::new(
            Arc::new(InMemoryVisitStore::new()),
            RouteAllowList::default(),
            AggregationConfig::default(),
        );
        let client: &dyn IngestClient = &service;

        let begin = TrackerCommand::Begin(BeginVisitRequest {
            user_key: Some("u1".to_string()),
            visit_id: "v1".to_string(),
            route: "/about".to_string(),
            device: Device::Desktop,
        });
        let update = TrackerCommand::Update(UpdateVisitRequest {
            visit_id: "v1".to_string(),
            elapsed_seconds: 9,
        });
        let unknown = TrackerCommand::Update(UpdateVisitRequest {
            visit_id: "missing".to_string(),
            elapsed_seconds: 9,
        });

        assert!(send_command(client, &begin).await.expect("begin").ok);
        assert!(send_command(client, &update).await.expect("update").ok);
        assert!(!send_command(client, &unknown).await.expect("unknown").ok);

        let stored = service.store().get_visit("v1").await.expect("get");
        assert_eq!(stored.map(|v| v.elapsed_seconds), Some(9));
    }
}
