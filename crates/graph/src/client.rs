use std::time::Duration;

use {
    outlook_config::GraphConfig,
    reqwest::{Method, StatusCode, Url},
    serde_json::Value,
    tracing::{debug, warn},
};

use crate::{
    error::{ApiError, GraphError},
    query::GraphQuery,
    retry::{self, RetryPolicy},
};

/// Successful Graph response.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphResponse {
    /// Parsed JSON body; `Null` for 204 or an empty body.
    pub payload: Value,
    /// `@odata.nextLink`, if Graph has more pages. Never followed automatically.
    pub next_link: Option<String>,
}

impl GraphResponse {
    /// The `value` array of a collection page.
    pub fn items(&self) -> Option<&[Value]> {
        self.payload
            .get("value")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
    }
}

/// Executes authenticated requests against the Graph endpoint.
#[derive(Debug, Clone)]
pub struct GraphClient {
    endpoint: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl GraphClient {
    pub fn new(config: &GraphConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            client,
            retry: RetryPolicy::from(&config.retry),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Resolve `path` against the endpoint. Absolute URLs (a previous
    /// `@odata.nextLink`) are used as-is, but only on the endpoint's origin.
    fn build_url(&self, path: &str, query: &GraphQuery) -> Result<String, GraphError> {
        let mut url = if path.starts_with("https://") || path.starts_with("http://") {
            if !self.same_origin(path) {
                return Err(GraphError::ForeignUrl(path.to_string()));
            }
            path.to_string()
        } else {
            format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
        };
        if !query.is_empty() {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&query.to_query_string());
        }
        Ok(url)
    }

    fn same_origin(&self, absolute: &str) -> bool {
        match (Url::parse(&self.endpoint), Url::parse(absolute)) {
            (Ok(base), Ok(target)) => base.origin() == target.origin(),
            _ => false,
        }
    }

    /// Run one Graph call, retrying 429, 5xx and transport failures.
    ///
    /// Any other non-2xx status (401 included) is returned on first sight.
    pub async fn call_graph_api(
        &self,
        token: &str,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &GraphQuery,
    ) -> Result<GraphResponse, GraphError> {
        if token.trim().is_empty() {
            return Err(GraphError::AuthRequired);
        }
        let url = self.build_url(path, query)?;
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(%method, path, attempt, "graph request");

            let mut req = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(token)
                .header(reqwest::header::ACCEPT, "application/json");
            if let Some(body) = body {
                req = req.json(body);
            }

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    if attempt < max_attempts {
                        let delay = self.retry.delay(attempt, None);
                        warn!(
                            path,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "graph request failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    warn!(path, attempt, error = %e, "graph request failed");
                    return Err(ApiError::transport(e.to_string()).into());
                },
            };

            let status = resp.status();
            if status.is_success() {
                return parse_success(status, resp).await;
            }

            if RetryPolicy::is_retryable(status.as_u16()) && attempt < max_attempts {
                let delay = self.retry.delay(attempt, retry::retry_after(resp.headers()));
                warn!(
                    path,
                    status = status.as_u16(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "graph request throttled or failed, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let text = resp.text().await.unwrap_or_default();
            let err = ApiError::from_response(status.as_u16(), &text);
            warn!(
                path,
                status = status.as_u16(),
                code = err.code.as_deref().unwrap_or("-"),
                "graph request rejected"
            );
            return Err(err.into());
        }
    }
}

async fn parse_success(
    status: StatusCode,
    resp: reqwest::Response,
) -> Result<GraphResponse, GraphError> {
    let text = resp
        .text()
        .await
        .map_err(|e| ApiError::transport(format!("failed to read response body: {e}")))?;
    if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
        return Ok(GraphResponse {
            payload: Value::Null,
            next_link: None,
        });
    }
    let payload: Value = serde_json::from_str(&text).map_err(|e| ApiError {
        status: Some(status.as_u16()),
        code: None,
        message: format!("malformed JSON response: {e}"),
    })?;
    let next_link = payload
        .get("@odata.nextLink")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(GraphResponse { payload, next_link })
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        outlook_config::RetryConfig,
        serde_json::json,
        wiremock::{
            Mock, MockServer, Request, ResponseTemplate,
            matchers::{any, body_json, header, method, path, query_param},
        },
    };

    fn client(endpoint: &str) -> GraphClient {
        GraphClient::new(&GraphConfig {
            endpoint: format!("{endpoint}/v1.0/"),
            request_timeout_secs: 5,
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 20,
                multiplier: 2.0,
                jitter: false,
            },
        })
        .unwrap()
    }

    async fn get(c: &GraphClient, p: &str) -> Result<GraphResponse, GraphError> {
        c.call_graph_api("tok", Method::GET, p, None, &GraphQuery::new())
            .await
    }

    #[tokio::test]
    async fn test_success_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u1"})))
            .expect(1)
            .mount(&server)
            .await;

        let resp = get(&client(&server.uri()), "me").await.unwrap();
        assert_eq!(resp.payload["id"], "u1");
        assert!(resp.items().is_none());
        assert!(resp.next_link.is_none());
    }

    #[tokio::test]
    async fn test_429_then_200_is_transparent() {
        let server = MockServer::start().await;
        Mock::given(path("/v1.0/me/joinedTeams"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/v1.0/me/joinedTeams"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": [{"id": "t"}]})))
            .expect(1)
            .mount(&server)
            .await;

        let resp = get(&client(&server.uri()), "me/joinedTeams").await.unwrap();
        assert_eq!(resp.items().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_429_exhausts_retries() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"code": "TooManyRequests", "message": "slow down"}
            })))
            .expect(3)
            .mount(&server)
            .await;

        let err = get(&client(&server.uri()), "me").await.unwrap_err();
        match err {
            GraphError::Api(e) => {
                assert_eq!(e.status, Some(429));
                assert_eq!(e.code.as_deref(), Some("TooManyRequests"));
                assert_eq!(e.message, "slow down");
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let resp = get(&client(&server.uri()), "me").await.unwrap();
        assert_eq!(resp.payload["ok"], true);
    }

    #[tokio::test]
    async fn test_401_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"code": "InvalidAuthenticationToken", "message": "expired"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = get(&client(&server.uri()), "me").await.unwrap_err();
        assert_eq!(err.status(), Some(401));
    }

    #[tokio::test]
    async fn test_403_carries_graph_code() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": "Forbidden", "message": "Missing role"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let GraphError::Api(err) = get(&client(&server.uri()), "teams/x").await.unwrap_err()
        else {
            panic!("expected api error");
        };
        assert_eq!(err.status, Some(403));
        assert_eq!(err.code.as_deref(), Some("Forbidden"));
    }

    #[tokio::test]
    async fn test_next_link_is_exposed_not_followed() {
        let server = MockServer::start().await;
        let next = format!("{}/v1.0/me/joinedTeams?$skiptoken=abc", server.uri());
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "a"}, {"id": "b"}],
                "@odata.nextLink": next,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resp = get(&client(&server.uri()), "me/joinedTeams").await.unwrap();
        assert_eq!(resp.items().unwrap().len(), 2);
        assert_eq!(resp.next_link.as_deref(), Some(next.as_str()));
    }

    #[tokio::test]
    async fn test_absolute_next_link_is_used_verbatim() {
        let server = MockServer::start().await;
        Mock::given(path("/v1.0/me/joinedTeams"))
            .and(query_param("$skiptoken", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .expect(1)
            .mount(&server)
            .await;

        let c = client(&server.uri());
        let next = format!("{}/v1.0/me/joinedTeams?$skiptoken=abc", server.uri());
        let resp = get(&c, &next).await.unwrap();
        assert_eq!(resp.items().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_query_keys_are_verbatim() {
        let server = MockServer::start().await;
        Mock::given(path("/v1.0/teams/t1/channels/c1/messages"))
            .and(query_param("$top", "5"))
            .and(query_param("$orderby", "createdDateTime desc"))
            .and(|req: &Request| {
                req.url
                    .query()
                    .is_some_and(|q| q.starts_with("$top=5&$orderby="))
            })
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .expect(1)
            .mount(&server)
            .await;

        let query = GraphQuery::new()
            .param("$top", 5)
            .param("$orderby", "createdDateTime desc");
        client(&server.uri())
            .call_graph_api(
                "tok",
                Method::GET,
                "/teams/t1/channels/c1/messages",
                None,
                &query,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_post_body_and_no_content() {
        let server = MockServer::start().await;
        let body = json!({"body": {"contentType": "text", "content": "hi"}});
        Mock::given(method("POST"))
            .and(path("/v1.0/teams/t/channels/c/messages"))
            .and(body_json(body.clone()))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let resp = client(&server.uri())
            .call_graph_api(
                "tok",
                Method::POST,
                "teams/t/channels/c/messages",
                Some(&body),
                &GraphQuery::new(),
            )
            .await
            .unwrap();
        assert_eq!(resp.payload, Value::Null);
    }

    #[tokio::test]
    async fn test_empty_token_short_circuits() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .call_graph_api("", Method::GET, "me", None, &GraphQuery::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::AuthRequired));
    }

    #[tokio::test]
    async fn test_transport_failure_has_no_status() {
        let err = get(&client("http://127.0.0.1:1"), "me").await.unwrap_err();
        let GraphError::Api(api) = err else {
            panic!("expected api error");
        };
        assert!(api.is_transport());
        assert_eq!(api.status, None);
    }

    #[test]
    fn test_build_url_joins_slashes() {
        let c = client("https://graph.example");
        let q = GraphQuery::new().param("$top", 1);
        assert_eq!(
            c.build_url("/me/joinedTeams", &q).unwrap(),
            "https://graph.example/v1.0/me/joinedTeams?$top=1"
        );
        assert_eq!(
            c.build_url("https://graph.example/v1.0/x?$skiptoken=1", &q)
                .unwrap(),
            "https://graph.example/v1.0/x?$skiptoken=1&$top=1"
        );
    }

    #[test]
    fn test_build_url_rejects_other_origins() {
        let c = client("https://graph.example");
        let q = GraphQuery::new();
        for foreign in [
            "https://evil.example/v1.0/me",
            "http://graph.example/v1.0/me",
            "https://graph.example:8443/v1.0/me",
            "https://graph.example.evil.example/v1.0/me",
        ] {
            assert!(
                matches!(c.build_url(foreign, &q), Err(GraphError::ForeignUrl(_))),
                "{foreign} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_foreign_absolute_url_never_receives_token() {
        let graph = MockServer::start().await;
        let foreign = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .expect(0)
            .mount(&foreign)
            .await;

        let c = client(&graph.uri());
        let err = c
            .call_graph_api(
                "secret-token",
                Method::GET,
                &format!("{}/steal", foreign.uri()),
                None,
                &GraphQuery::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::ForeignUrl(_)));
        assert_eq!(err.status(), None);
    }
}
