use crate::config::Config;
use crate::errors::*;
use crate::model::{FileHashes, MonitorRequest, ScanResult};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;

pub const UNMANAGED_API_VERSION: &str = "2022-05-23~experimental";

/// The analysis service, as far as this client is concerned. Every call is
/// exactly one request; retries are up to the caller.
#[async_trait]
pub trait Api: Send + Sync {
    async fn submit_test(&self, scan_result: &ScanResult) -> Result<Value, ApiError>;

    async fn poll_test(&self, token: &str) -> Result<Value, ApiError>;

    async fn submit_monitor(&self, request: &MonitorRequest) -> Result<Value, ApiError>;

    async fn poll_monitor(&self, token: &str) -> Result<Value, ApiError>;

    async fn create_depgraph(&self, hashes: &FileHashes) -> Result<Value, ApiError>;

    async fn get_depgraph(&self, id: &str) -> Result<Value, ApiError>;

    async fn get_issues(&self, body: &Value) -> Result<Value, ApiError>;
}

fn is_ci() -> bool {
    env::var_os("CI").map(|v| !v.is_empty()).unwrap_or(false)
}

fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for key in ["userMessage", "message", "error"] {
            if let Some(msg) = value.get(key).and_then(Value::as_str) {
                return msg.to_string();
            }
        }
        if let Some(detail) = value
            .pointer("/errors/0/detail")
            .and_then(Value::as_str)
        {
            return detail.to_string();
        }
    }
    body.trim().to_string()
}

pub struct HttpApi {
    client: Client,
    api: String,
    token: String,
    org: Option<String>,
}

impl HttpApi {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let token = config.token.clone().ok_or(ApiError::MissingToken)?;
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(HttpApi {
            client,
            api: config.api.trim_end_matches('/').to_string(),
            token,
            org: config.org.clone(),
        })
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder
            .header("Authorization", format!("token {}", self.token))
            .header("x-is-ci", is_ci().to_string());
        if let Some(org) = &self.org {
            builder.query(&[("org", org)])
        } else {
            builder
        }
    }

    fn rest_url(&self, suffix: &str) -> Result<String, ApiError> {
        let org = self.org.as_ref().ok_or_else(|| ApiError::Validation {
            message: "The unmanaged flow needs an organization, set --org or VULNFACTS_ORG"
                .to_string(),
        })?;
        Ok(format!(
            "{}/rest/orgs/{}/unmanaged_ecosystem/{}",
            self.api, org, suffix
        ))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Value, ApiError> {
        let response = self
            .request(builder)
            .query(&[("version", UNMANAGED_API_VERSION)])
            .send()
            .await?;
        read_json(response).await
    }

    async fn send_json<T: Serialize + ?Sized + Sync>(
        &self,
        builder: RequestBuilder,
        body: &T,
    ) -> Result<Value, ApiError> {
        let response = self.request(builder).json(body).send().await?;
        read_json(response).await
    }
}

async fn read_json(response: Response) -> Result<Value, ApiError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ApiError::from_status(status, error_message(&body)));
    }
    Ok(serde_json::from_str(&body)?)
}

#[async_trait]
impl Api for HttpApi {
    async fn submit_test(&self, scan_result: &ScanResult) -> Result<Value, ApiError> {
        let url = format!("{}/test-dependencies", self.api);
        debug!("Submitting facts for test: POST {}", url);
        self.send_json(self.client.post(url), &json!({ "scanResult": scan_result }))
            .await
    }

    async fn poll_test(&self, token: &str) -> Result<Value, ApiError> {
        let url = format!("{}/test-dependencies/{}", self.api, token);
        let response = self.request(self.client.get(url)).send().await?;
        read_json(response).await
    }

    async fn submit_monitor(&self, request: &MonitorRequest) -> Result<Value, ApiError> {
        let url = format!("{}/monitor-dependencies", self.api);
        debug!("Submitting facts for monitor: PUT {}", url);
        self.send_json(self.client.put(url), request).await
    }

    async fn poll_monitor(&self, token: &str) -> Result<Value, ApiError> {
        let url = format!("{}/monitor-dependencies/{}", self.api, token);
        let response = self.request(self.client.put(url)).send().await?;
        read_json(response).await
    }

    async fn create_depgraph(&self, hashes: &FileHashes) -> Result<Value, ApiError> {
        let url = self.rest_url("depgraphs")?;
        debug!("Submitting {} file signatures: POST {}", hashes.hashes.len(), url);
        self.send(self.client.post(url).json(hashes)).await
    }

    async fn get_depgraph(&self, id: &str) -> Result<Value, ApiError> {
        let url = self.rest_url(&format!("depgraphs/{}", id))?;
        self.send(self.client.get(url)).await
    }

    async fn get_issues(&self, body: &Value) -> Result<Value, ApiError> {
        let url = self.rest_url("issues")?;
        debug!("Fetching issues: POST {}", url);
        self.send(self.client.post(url).json(body)).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"message":"Invalid auth token"}"#), "Invalid auth token");
        assert_eq!(
            error_message(r#"{"userMessage":"Try again later","message":"rate"}"#),
            "Try again later"
        );
        assert_eq!(
            error_message(r#"{"errors":[{"detail":"org not found"}]}"#),
            "org not found"
        );
        assert_eq!(error_message("  Bad Gateway\n"), "Bad Gateway");
    }

    #[test]
    fn test_http_api_needs_token() {
        let config = Config::default();
        assert!(matches!(HttpApi::new(&config), Err(ApiError::MissingToken)));
    }

    #[test]
    fn test_rest_url_needs_org() -> Result<()> {
        let mut config = Config::default();
        config.token = Some("secret".into());
        let api = HttpApi::new(&config)?;
        assert!(matches!(
            api.rest_url("depgraphs"),
            Err(ApiError::Validation { .. })
        ));

        config.org = Some("my-org".into());
        config.api = "https://example.com/api/v1/".into();
        let api = HttpApi::new(&config)?;
        assert_eq!(
            api.rest_url("depgraphs/abc")?,
            "https://example.com/api/v1/rest/orgs/my-org/unmanaged_ecosystem/depgraphs/abc"
        );
        Ok(())
    }
}
