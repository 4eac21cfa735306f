//! Testing Farm HTTP client

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{BackendError, RequestResponse, TestingFarmClient};

#[derive(Debug, Clone)]
pub struct HttpTestingFarmClient {
    http: reqwest::Client,
    api_url: String,
}

impl HttpTestingFarmClient {
    pub fn new(http: reqwest::Client, api_url: String) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TestingFarmClient for HttpTestingFarmClient {
    fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn submit_test_request(
        &self,
        url: &str,
        method: reqwest::Method,
        headers: &[(&str, &str)],
        body: &Value,
    ) -> Result<RequestResponse, BackendError> {
        let mut builder = self.http.request(method, url).json(body);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let json = serde_json::from_str(&text).ok();
        debug!(url, status = status.as_u16(), "Testing Farm responded");
        Ok(RequestResponse {
            status_code: status.as_u16(),
            ok: status.is_success(),
            json,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn non_success_status_is_returned_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/trigger"))
            .and(body_partial_json(json!({"pipeline": {"id": "p1"}})))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"message": "bad"})))
            .mount(&server)
            .await;

        let client = HttpTestingFarmClient::new(reqwest::Client::new(), server.uri());
        let response = client
            .submit_test_request(
                &format!("{}/trigger", client.api_url()),
                reqwest::Method::POST,
                &[("Content-Type", "application/json")],
                &json!({"pipeline": {"id": "p1"}}),
            )
            .await
            .unwrap();

        assert!(!response.ok);
        assert_eq!(response.status_code, 400);
        assert_eq!(response.json.unwrap()["message"], "bad");
    }
}
