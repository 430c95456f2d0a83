//! HTTP client for the project/service API.

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{EnvironmentInfo, ServiceCatalog, ServiceTemplate};
use crate::config::ServiceApiConfig;
use crate::error::{Error, Result};

/// `ServiceCatalog` over HTTP.
#[derive(Clone)]
pub struct ServiceClient {
    http_client: HttpClient,
    base_url: String,
}

impl ServiceClient {
    pub fn new(config: &ServiceApiConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .user_agent(concat!("warpdrive/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.address.trim_end_matches('/').to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "GET request");

        let response = self.http_client.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::ServiceApi {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ServiceCatalog for ServiceClient {
    #[instrument(skip(self))]
    async fn service_template(
        &self,
        name: &str,
        service_type: &str,
        project: &str,
        revision: i64,
    ) -> Result<ServiceTemplate> {
        let revision = revision.to_string();
        self.get(
            &format!("/api/service/services/{name}/{service_type}"),
            &[("projectName", project), ("revision", &revision)],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn rendered_manifests(
        &self,
        project: &str,
        env: &str,
        service: &str,
    ) -> Result<Vec<String>> {
        self.get(
            "/api/environment/export/service",
            &[
                ("projectName", project),
                ("envName", env),
                ("serviceName", service),
                ("source", "wd"),
                ("ifPassFilter", "true"),
            ],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn environment(&self, project: &str, env: &str) -> Result<EnvironmentInfo> {
        self.get(
            &format!("/api/environment/environments/{env}"),
            &[("projectName", project)],
        )
        .await
    }
}
