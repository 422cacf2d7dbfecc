// HTTP transport against the upstream reservation API
// Non-2xx responses become exactly one typed ApiError; network failures pass through untouched

use std::time::Instant;

use parking_lot::RwLock;
use reqwest::{header::HeaderMap, Method, RequestBuilder};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    config::ClientConfig,
    errors::{ApiError, ClientError, ResponseDetails, Result},
};

const REDACTED: &str = "[REDACTED]";

// Keys that are always secret
const SECRET_KEYS: &[&str] = &[
    "authorization",
    "password",
    "book_token",
    "struct_payment_method",
    "x-resy-auth-token",
    "x-resy-universal-auth",
];

// Any key containing one of these is treated as secret
const SECRET_KEY_FRAGMENTS: &[&str] = &["token", "password", "payment", "secret", "api_key"];

pub fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SECRET_KEYS.contains(&key.as_str()) || SECRET_KEY_FRAGMENTS.iter().any(|f| key.contains(f))
}

pub fn redact_pairs(pairs: &[(&str, String)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| {
            let value = if is_secret_key(k) {
                REDACTED.to_string()
            } else {
                v.clone()
            };
            (k.to_string(), value)
        })
        .collect()
}

pub fn redact_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if is_secret_key(k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_json(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_json).collect()),
        other => other.clone(),
    }
}

// Response bodies are only logged when they parse as JSON and can be redacted
fn loggable_body(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => redact_json(&value).to_string(),
        Err(_) => format!("<non-json body, {} bytes>", body.len()),
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Raw body of a 2xx response.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
    pub endpoint: String,
}

pub struct Transport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    auth_token: RwLock<String>,
}

impl Transport {
    pub fn new(config: &ClientConfig) -> std::result::Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            auth_token: RwLock::new(config.auth_token.clone()),
        })
    }

    /// Replaces the account token sent with every request.
    pub fn set_auth_token(&self, token: &str) {
        *self.auth_token.write() = token.to_string();
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut builder = self
            .client
            .request(method, url)
            .header("authorization", format!("ResyAPI api_key=\"{}\"", self.api_key))
            .header("accept", "application/json, text/plain, */*")
            .header("origin", "https://resy.com")
            .header("referer", "https://resy.com/");

        let token = self.auth_token.read().clone();
        if !token.is_empty() {
            builder = builder
                .header("x-resy-auth-token", token.clone())
                .header("x-resy-universal-auth", token);
        }
        builder
    }

    pub async fn get(&self, endpoint: &str, query: &[(&str, String)]) -> Result<TransportResponse> {
        info!(method = "GET", endpoint, params = ?redact_pairs(query), "upstream request");
        let builder = self.request(Method::GET, endpoint).query(query);
        self.execute(endpoint, builder).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<TransportResponse> {
        let logged = serde_json::to_value(body)
            .map(|v| redact_json(&v).to_string())
            .unwrap_or_else(|_| "<unserializable>".to_string());
        info!(method = "POST", endpoint, body = %logged, "upstream request");
        let builder = self.request(Method::POST, endpoint).json(body);
        self.execute(endpoint, builder).await
    }

    pub async fn post_form(&self, endpoint: &str, form: &[(&str, String)]) -> Result<TransportResponse> {
        info!(method = "POST", endpoint, form = ?redact_pairs(form), "upstream request");
        let builder = self.request(Method::POST, endpoint).form(form);
        self.execute(endpoint, builder).await
    }

    async fn execute(&self, endpoint: &str, builder: RequestBuilder) -> Result<TransportResponse> {
        let started = Instant::now();
        let response = builder.send().await?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if status.is_success() {
            info!(endpoint, status = status.as_u16(), elapsed_ms, "upstream response");
            debug!(endpoint, body = %loggable_body(&body), "upstream response body");
            return Ok(TransportResponse {
                status: status.as_u16(),
                body,
                endpoint: endpoint.to_string(),
            });
        }

        warn!(
            endpoint,
            status = status.as_u16(),
            elapsed_ms,
            retry_after,
            body = %loggable_body(&body),
            "upstream error response"
        );
        Err(ApiError::from_status(
            ResponseDetails::new(status.as_u16(), &body, endpoint),
            retry_after,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport_for(base_url: &str) -> Transport {
        let config = ClientConfig {
            base_url: base_url.to_string(),
            api_key: "test-key".into(),
            auth_token: "user-token".into(),
            timeout_ms: 2_000,
            ..Default::default()
        };
        Transport::new(&config).unwrap()
    }

    #[test]
    fn test_secret_keys_are_redacted() {
        let pairs = vec![
            ("book_token", "abc".to_string()),
            ("struct_payment_method", "{\"id\":1}".to_string()),
            ("Password", "hunter2".to_string()),
            ("x_auth_token_v2", "t".to_string()),
            ("venue_id", "1505".to_string()),
        ];
        let redacted = redact_pairs(&pairs);
        assert_eq!(redacted[0].1, REDACTED);
        assert_eq!(redacted[1].1, REDACTED);
        assert_eq!(redacted[2].1, REDACTED);
        assert_eq!(redacted[3].1, REDACTED);
        assert_eq!(redacted[4].1, "1505");
    }

    #[test]
    fn test_nested_json_is_redacted() {
        let body = json!({
            "email": "a@b.c",
            "payment_methods": [{"id": 1}],
            "nested": {"token": "secret", "party_size": 2},
            "list": [{"book_token": {"value": "x"}}]
        });
        let redacted = redact_json(&body);
        assert_eq!(redacted["email"], "a@b.c");
        assert_eq!(redacted["payment_methods"], REDACTED);
        assert_eq!(redacted["nested"]["token"], REDACTED);
        assert_eq!(redacted["nested"]["party_size"], 2);
        assert_eq!(redacted["list"][0]["book_token"], REDACTED);

        assert_eq!(loggable_body("not json"), "<non-json body, 8 bytes>");
    }

    #[tokio::test]
    async fn test_success_returns_raw_body_and_sends_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/4/find"))
            .and(query_param("venue_id", "1505"))
            .and(header("authorization", "ResyAPI api_key=\"test-key\""))
            .and(header("x-resy-auth-token", "user-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"ok\":true}"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server.uri());
        let response = transport
            .get("/4/find", &[("venue_id", "1505".to_string())])
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, "{\"ok\":true}");
        assert_eq!(response.endpoint, "/4/find");
    }

    #[tokio::test]
    async fn test_status_codes_map_to_error_categories() {
        let server = MockServer::start().await;
        Mock::given(path("/limited"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "7")
                    .set_body_string("slow down"),
            )
            .mount(&server)
            .await;
        Mock::given(path("/auth"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;
        Mock::given(path("/forbidden"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(path("/flaky"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
            .mount(&server)
            .await;

        let transport = transport_for(&server.uri());

        let err = transport.get("/limited", &[]).await.unwrap_err();
        match err {
            ApiError::RateLimit {
                response,
                retry_after,
            } => {
                assert_eq!(retry_after, Some(7));
                assert_eq!(response.status, 429);
                assert_eq!(response.body, "slow down");
                assert_eq!(response.endpoint, "/limited");
            }
            other => panic!("expected rate limit, got {other:?}"),
        }

        assert!(matches!(transport.get("/auth", &[]).await, Err(ApiError::Auth(_))));
        assert!(matches!(transport.get("/forbidden", &[]).await, Err(ApiError::Auth(_))));
        assert!(matches!(transport.get("/flaky", &[]).await, Err(ApiError::Transient(_))));

        match transport.get("/missing", &[]).await {
            Err(ApiError::Http(details)) => {
                assert_eq!(details.status, 404);
                assert_eq!(details.body, "nope");
            }
            other => panic!("expected generic api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_post_form_and_json_bodies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/3/book"))
            .and(body_string_contains("book_token=abc"))
            .respond_with(ResponseTemplate::new(201).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/3/details"))
            .and(body_string_contains("\"party_size\":2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server.uri());
        transport
            .post_form("/3/book", &[("book_token", "abc".to_string())])
            .await
            .unwrap();
        transport
            .post_json("/3/details", &json!({"party_size": 2}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_connection_failure_is_a_network_error() {
        let transport = transport_for("http://127.0.0.1:1");
        let err = transport.get("/4/find", &[]).await.unwrap_err();
        assert!(matches!(err, ApiError::Network(_)));
        assert!(err.is_network());
        assert_eq!(err.status(), None);
    }

    #[tokio::test]
    async fn test_updated_auth_token_is_sent() {
        let server = MockServer::start().await;
        Mock::given(header("x-resy-auth-token", "fresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server.uri());
        transport.set_auth_token("fresh");
        transport.get("/3/venue", &[]).await.unwrap();
    }
}
