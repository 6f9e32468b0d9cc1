use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::NetError;
use crate::registry::ServiceRegistry;

/// One downstream operation: `POST {base}/api/{function}` with the step's
/// resolved parameters as the JSON body. The caller's bearer credential is
/// forwarded unchanged on every outbound call.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    async fn call(
        &self,
        service: &str,
        function: &str,
        parameters: &Map<String, Value>,
        bearer: &str,
    ) -> Result<Value, NetError>;
}

pub struct HttpServiceClient {
    client: reqwest::Client,
    registry: ServiceRegistry,
}

impl HttpServiceClient {
    pub fn new(registry: ServiceRegistry) -> Result<Self, NetError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .tcp_keepalive(Some(std::time::Duration::from_secs(30)))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|err| NetError::transport(&format!("failed to build http client: {err}")))?;
        Ok(Self { client, registry })
    }

    fn function_url(&self, service: &str, function: &str) -> Result<url::Url, NetError> {
        let base = self.registry.endpoint(service)?;
        let path = format!(
            "{}/api/{function}",
            base.as_str().trim_end_matches('/')
        );
        url::Url::parse(&path).map_err(|err| NetError::invalid_endpoint(service, &err.to_string()))
    }
}

#[async_trait]
impl ServiceClient for HttpServiceClient {
    async fn call(
        &self,
        service: &str,
        function: &str,
        parameters: &Map<String, Value>,
        bearer: &str,
    ) -> Result<Value, NetError> {
        let url = self.function_url(service, function)?;
        tracing::debug!(target: "aperture::net", service, function, %url, "downstream call");

        let response = self
            .client
            .post(url)
            .bearer_auth(bearer)
            .json(parameters)
            .send()
            .await
            .map_err(|err| {
                let detail = if err.is_timeout() {
                    format!("timeout calling {service}.{function}: {err}")
                } else if err.is_connect() {
                    format!("connection error calling {service}.{function}: {err}")
                } else {
                    format!("request to {service}.{function} failed: {err}")
                };
                NetError::transport(&detail)
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| NetError::transport(&format!("reading response body: {err}")))?;

        if !status.is_success() {
            let snippet = String::from_utf8_lossy(&body);
            let snippet = snippet.chars().take(256).collect::<String>();
            return Err(NetError::upstream_status(
                status.as_u16(),
                &format!("{service}.{function} returned {status}: {snippet}"),
            ));
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body)
            .map_err(|err| NetError::decode(&format!("{service}.{function}: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    async fn spawn_stub() -> String {
        let app = Router::new().route(
            "/api/Echo",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Json(json!({ "echo": body, "authorization": auth }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub");
        let addr = listener.local_addr().expect("stub addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn forwards_bearer_and_parameters() {
        let base = spawn_stub().await;
        let mut endpoints = std::collections::HashMap::new();
        endpoints.insert("EchoService".to_string(), base);
        let client =
            HttpServiceClient::new(ServiceRegistry::from_map(&endpoints).expect("registry"))
                .expect("client");

        let mut parameters = Map::new();
        parameters.insert("orderId".into(), json!("o-789"));

        let value = client
            .call("EchoService", "Echo", &parameters, "caller-token")
            .await
            .expect("call");
        assert_eq!(value["authorization"], json!("Bearer caller-token"));
        assert_eq!(value["echo"]["orderId"], json!("o-789"));
    }

    #[tokio::test]
    async fn missing_function_maps_to_permanent_error() {
        let base = spawn_stub().await;
        let mut endpoints = std::collections::HashMap::new();
        endpoints.insert("EchoService".to_string(), base);
        let client =
            HttpServiceClient::new(ServiceRegistry::from_map(&endpoints).expect("registry"))
                .expect("client");

        let err = client
            .call("EchoService", "Nope", &Map::new(), "caller-token")
            .await
            .expect_err("404");
        assert_eq!(err.source_status(), Some(404));
        assert_eq!(
            err.category(),
            aperture_errors::prelude::ErrorCategory::Permanent
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        let mut endpoints = std::collections::HashMap::new();
        // Port 9 is discard; nothing listens there in the test environment.
        endpoints.insert("DeadService".to_string(), "http://127.0.0.1:9".to_string());
        let client =
            HttpServiceClient::new(ServiceRegistry::from_map(&endpoints).expect("registry"))
                .expect("client");

        let err = client
            .call("DeadService", "Echo", &Map::new(), "caller-token")
            .await
            .expect_err("unreachable");
        assert_eq!(
            err.category(),
            aperture_errors::prelude::ErrorCategory::Transient
        );
    }
}
