//! JSON-over-HTTP catalog client.

use futures::FutureExt;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::client::{BoxFuture, CatalogClient, ClosedBlock, PublishOutcome, PublishRequest};
use blockpub_core::{CatalogConfig, Error, Result};

/// Talks to `POST {endpoint}/publish` and `POST {endpoint}/blocks/close`.
pub struct HttpCatalogClient {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpCatalogClient {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.endpoint, path);
        debug!("POST {}", url);

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::CatalogRegistration(format!("Request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::CatalogRegistration(format!(
                "Catalog error {} from {}: {}",
                status, url, body
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::CatalogRegistration(format!("Malformed response from {}: {}", url, e)))
    }
}

impl CatalogClient for HttpCatalogClient {
    fn publish(&self, request: PublishRequest) -> BoxFuture<'_, Result<PublishOutcome>> {
        async move { self.post("/publish", &request).await }.boxed()
    }

    fn close_and_migrate(&self, block_names: Vec<String>) -> BoxFuture<'_, Result<Vec<ClosedBlock>>> {
        async move {
            let body = json!({ "blocks": block_names, "migrate": true });
            self.post("/blocks/close", &body).await
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use blockpub_store::{Algorithm, Dataset, Pairing};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config(endpoint: String) -> CatalogConfig {
        CatalogConfig {
            endpoint,
            token: Some("secret".into()),
            request_timeout_secs: 5,
        }
    }

    fn request() -> PublishRequest {
        PublishRequest {
            algorithm: Algorithm {
                id: 1,
                application_name: "cmsRun".into(),
                application_family: "RECO".into(),
                application_version: "CMSSW_14_0_0".into(),
                param_set_hash: "abc".into(),
                param_set_content: None,
                in_catalog: false,
            },
            dataset: Dataset {
                id: 1,
                path: "/A/B-v1/RAW".into(),
                primary_dataset: "A".into(),
                processed_dataset: "B-v1".into(),
                data_tier: "RAW".into(),
                algorithm_id: Some(1),
                pairing_in_catalog: false,
            },
            pairing: Pairing {
                id: 1,
                algorithm_id: 1,
                dataset_id: 1,
                in_catalog: false,
            },
            files: vec![],
        }
    }

    #[tokio::test]
    async fn test_publish_decodes_outcome() {
        let app = Router::new().route(
            "/publish",
            post(|Json(req): Json<PublishRequest>| async move {
                Json(json!({
                    "algorithm_registered": true,
                    "pairing_registered": true,
                    "blocks": [{
                        "name": format!("{}#1", req.dataset.path),
                        "locations": ["T1_US_FNAL"],
                        "is_open": true,
                        "created_at": 1700000000,
                        "files": ["/store/f1.root"],
                    }],
                }))
            }),
        );
        let client = HttpCatalogClient::new(&config(serve(app).await)).unwrap();

        let outcome = client.publish(request()).await.unwrap();
        assert!(outcome.algorithm_registered);
        assert_eq!(outcome.blocks.len(), 1);
        assert_eq!(outcome.blocks[0].name, "/A/B-v1/RAW#1");
        assert_eq!(outcome.blocks[0].files, vec!["/store/f1.root"]);
    }

    #[tokio::test]
    async fn test_close_and_migrate() {
        let app = Router::new().route(
            "/blocks/close",
            post(|Json(body): Json<serde_json::Value>| async move {
                let first = body["blocks"][0].as_str().unwrap_or_default().to_string();
                Json(json!([{ "name": first, "created_at": 42 }]))
            }),
        );
        let client = HttpCatalogClient::new(&config(serve(app).await)).unwrap();

        let closed = client
            .close_and_migrate(vec!["b1".into(), "b2".into()])
            .await
            .unwrap();
        assert_eq!(closed, vec![ClosedBlock { name: "b1".into(), created_at: 42 }]);
    }

    #[tokio::test]
    async fn test_server_error_is_catalog_error() {
        let app = Router::new().route(
            "/publish",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
        );
        let client = HttpCatalogClient::new(&config(serve(app).await)).unwrap();

        let err = client.publish(request()).await.unwrap_err();
        assert!(matches!(err, Error::CatalogRegistration(ref m) if m.contains("503")));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_catalog_error() {
        // port 9 (discard) is not listening on loopback in test environments
        let client = HttpCatalogClient::new(&config("http://127.0.0.1:9".into())).unwrap();
        let err = client.close_and_migrate(vec!["b1".into()]).await.unwrap_err();
        assert!(matches!(err, Error::CatalogRegistration(_)));
    }
}
