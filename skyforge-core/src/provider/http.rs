//! HTTP provider client
//!
//! Talks JSON to the provider gateway. Every request carries the run's
//! region and id as headers and the context's per-call timeout.

use super::{
    AlarmApi, ClusterApi, ClusterRecord, CreateClusterRequest, CreateRoleRequest, GroupRecord,
    MetricAlarm, ProviderContext, ProviderError, ProviderResult, RoleApi, RoleRecord, ScalingApi,
    SetCapacityRequest,
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::debug;

const REGION_HEADER: &str = "x-skyforge-region";
const RUN_ID_HEADER: &str = "x-skyforge-run-id";

/// Provider gateway client
#[derive(Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpProvider {
    /// Create a new client; `connect_timeout` bounds connection setup only,
    /// request timeouts come from the run context
    pub fn new(base_url: &str, connect_timeout: Duration) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ProviderError::Rejected(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Set bearer token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Build headers for requests
    fn headers(&self, ctx: &ProviderContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Ok(value) = HeaderValue::from_str(&ctx.region) {
            headers.insert(REGION_HEADER, value);
        }
        if let Ok(value) = HeaderValue::from_str(&ctx.run_id.to_string()) {
            headers.insert(RUN_ID_HEADER, value);
        }
        if let Some(token) = &self.token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        headers
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        ctx: &ProviderContext,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> ProviderResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, url = %url, run_id = %ctx.run_id, "Provider request");

        let mut request = self
            .client
            .request(method, &url)
            .headers(self.headers(ctx))
            .timeout(ctx.request_timeout);

        if let Some(body) = body {
            request = request.json(body);
        }

        request.send().await.map_err(classify_transport_error)
    }

    /// Send and decode a JSON body; 404 becomes `Ok(None)`
    async fn fetch_optional<T: DeserializeOwned>(
        &self,
        ctx: &ProviderContext,
        path: &str,
    ) -> ProviderResult<Option<T>> {
        let response = self.send::<()>(ctx, Method::GET, path, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::decode(response).await.map(Some)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> ProviderResult<T> {
        let status = response.status();
        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| ProviderError::Rejected(format!("Malformed response body: {}", e)))
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(classify_status(status, message))
        }
    }

    async fn expect_success(response: reqwest::Response) -> ProviderResult<()> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(classify_status(status, message))
        }
    }
}

/// Map a non-success HTTP status onto the provider failure taxonomy
pub fn classify_status(status: StatusCode, message: String) -> ProviderError {
    let message = if message.trim().is_empty() {
        status.to_string()
    } else {
        message
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::AccessDenied(message),
        StatusCode::NOT_FOUND => ProviderError::NotFound(message),
        StatusCode::CONFLICT => ProviderError::AlreadyExists(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            ProviderError::Transient(message)
        }
        s if s.is_server_error() => ProviderError::Transient(message),
        _ => ProviderError::Rejected(message),
    }
}

fn classify_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ProviderError::Transient(err.to_string())
    } else {
        ProviderError::Rejected(err.to_string())
    }
}

fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

#[async_trait]
impl RoleApi for HttpProvider {
    async fn get_role(&self, ctx: &ProviderContext, name: &str) -> ProviderResult<Option<RoleRecord>> {
        self.fetch_optional(ctx, &format!("/iam/roles/{}", segment(name)))
            .await
    }

    async fn create_role(
        &self,
        ctx: &ProviderContext,
        request: &CreateRoleRequest,
    ) -> ProviderResult<RoleRecord> {
        let response = self
            .send(ctx, Method::POST, "/iam/roles", Some(request))
            .await?;
        Self::decode(response).await
    }

    async fn attach_role_policy(
        &self,
        ctx: &ProviderContext,
        role_name: &str,
        policy_arn: &str,
    ) -> ProviderResult<()> {
        let body = serde_json::json!({ "policy_arn": policy_arn });
        let path = format!("/iam/roles/{}/policies", segment(role_name));
        let response = self.send(ctx, Method::PUT, &path, Some(&body)).await?;
        Self::expect_success(response).await
    }
}

#[async_trait]
impl ClusterApi for HttpProvider {
    async fn create_cluster(
        &self,
        ctx: &ProviderContext,
        request: &CreateClusterRequest,
    ) -> ProviderResult<ClusterRecord> {
        let response = self
            .send(ctx, Method::POST, "/eks/clusters", Some(request))
            .await?;
        Self::decode(response).await
    }

    async fn describe_cluster(&self, ctx: &ProviderContext, name: &str) -> ProviderResult<ClusterRecord> {
        let path = format!("/eks/clusters/{}", segment(name));
        let response = self.send::<()>(ctx, Method::GET, &path, None).await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl AlarmApi for HttpProvider {
    async fn put_metric_alarm(&self, ctx: &ProviderContext, alarm: &MetricAlarm) -> ProviderResult<()> {
        let path = format!("/cloudwatch/alarms/{}", segment(&alarm.name));
        let response = self.send(ctx, Method::PUT, &path, Some(alarm)).await?;
        Self::expect_success(response).await
    }
}

#[async_trait]
impl ScalingApi for HttpProvider {
    async fn describe_group(&self, ctx: &ProviderContext, name: &str) -> ProviderResult<Option<GroupRecord>> {
        self.fetch_optional(ctx, &format!("/autoscaling/groups/{}", segment(name)))
            .await
    }

    async fn set_desired_capacity(
        &self,
        ctx: &ProviderContext,
        request: &SetCapacityRequest,
    ) -> ProviderResult<()> {
        let path = format!(
            "/autoscaling/groups/{}/desired-capacity",
            segment(&request.group_name)
        );
        let response = self.send(ctx, Method::PUT, &path, Some(request)).await?;
        Self::expect_success(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = HttpProvider::new("http://localhost:8443/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url, "http://localhost:8443");
        assert!(client.token.is_none());
    }

    #[test]
    fn test_client_with_token() {
        let client = HttpProvider::new("http://localhost:8443", Duration::from_secs(5))
            .unwrap()
            .with_token("test-token");
        assert_eq!(client.token, Some("test-token".to_string()));
    }

    #[test]
    fn test_headers_carry_run_context() {
        let client = HttpProvider::new("http://localhost:8443", Duration::from_secs(5))
            .unwrap()
            .with_token("t");
        let ctx = ProviderContext::new("eu-west-1", Duration::from_secs(10));
        let headers = client.headers(&ctx);

        assert_eq!(headers.get(REGION_HEADER).unwrap(), "eu-west-1");
        assert_eq!(
            headers.get(RUN_ID_HEADER).unwrap().to_str().unwrap(),
            ctx.run_id.to_string()
        );
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer t");
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, "no".into()),
            ProviderError::AccessDenied(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::CONFLICT, "exists".into()),
            ProviderError::AlreadyExists(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down".into()),
            ProviderError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, String::new()),
            ProviderError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "bad".into()),
            ProviderError::Rejected(_)
        ));
    }

    #[test]
    fn test_empty_body_falls_back_to_status_text() {
        match classify_status(StatusCode::NOT_FOUND, "  ".into()) {
            ProviderError::NotFound(msg) => assert!(msg.contains("404")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
