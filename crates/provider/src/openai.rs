use anyhow::Result;
use async_trait::async_trait;
use devmate_auth::Credential;
use futures::stream::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::json;

use crate::sse::parse_sse_stream;
use crate::types::*;
use crate::{ChatModel, ProviderError};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Stands in for the API key when a default `Authorization` header carries
/// the gateway token instead. Never sent.
const PLACEHOLDER_API_KEY: &str = "1";

pub struct OpenAIClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    default_headers: HeaderMap,
}

impl OpenAIClient {
    pub fn new(
        http: reqwest::Client,
        base_url: Option<String>,
        credential: Credential,
    ) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let api_key = match &credential {
            Credential::ApiKey(key) => key.clone(),
            Credential::Bearer(_) => {
                let mut value = HeaderValue::from_str(&credential.header_value())?;
                value.set_sensitive(true);
                default_headers.insert(AUTHORIZATION, value);
                PLACEHOLDER_API_KEY.to_string()
            }
        };

        let base_url = base_url
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http,
            base_url,
            api_key,
            default_headers,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chat_request(&self) -> reqwest::RequestBuilder {
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.http.post(url);
        if !self.default_headers.contains_key(AUTHORIZATION) {
            req = req.bearer_auth(&self.api_key);
        }
        req.headers(self.default_headers.clone())
    }

    fn build_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": stream,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let resp = self.chat_request().json(body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let body = resp.text().await.unwrap_or_default();
            return Err(
                ProviderError::from_status(status.as_u16(), body, retry_after.as_deref()).into(),
            );
        }
        Ok(resp)
    }
}

fn parse_usage(value: &serde_json::Value) -> Option<Usage> {
    if !value.is_object() {
        return None;
    }
    let field = |name: &str| {
        value[name]
            .as_u64()
            .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX))
    };
    Some(Usage {
        prompt_tokens: field("prompt_tokens"),
        completion_tokens: field("completion_tokens"),
        total_tokens: field("total_tokens"),
    })
}

#[async_trait]
impl ChatModel for OpenAIClient {
    async fn chat(&self, request: &CompletionRequest) -> Result<Completion> {
        let body = self.build_body(request, false);
        let resp = self.send(&body).await?;

        let data: serde_json::Value = resp.json().await?;
        let choice = &data["choices"][0];
        let content = choice["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(Completion {
            content,
            model: data["model"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| request.model.clone()),
            usage: parse_usage(&data["usage"]),
        })
    }

    async fn chat_stream(&self, request: &CompletionRequest) -> Result<DeltaStream> {
        let body = self.build_body(request, true);
        let resp = self.send(&body).await?;

        tracing::debug!(model = %request.model, "Upstream stream opened");

        let deltas = parse_sse_stream(resp).filter_map(|result| {
            let item = match result {
                Ok(sse) => match serde_json::from_str::<serde_json::Value>(&sse.data) {
                    Ok(data) => data["choices"][0]["delta"]["content"]
                        .as_str()
                        .filter(|s| !s.is_empty())
                        .map(|s| Ok(s.to_string())),
                    Err(e) => Some(Err(ProviderError::Stream(e.to_string()).into())),
                },
                Err(e) => Some(Err(e)),
            };
            futures::future::ready(item)
        });

        Ok(Box::pin(deltas))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(stream: bool) -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o".into(),
            messages: vec![Message::system("be brief"), Message::user("hi")],
            max_tokens: Some(500),
            stream,
        }
    }

    fn direct_client(server: &MockServer) -> OpenAIClient {
        OpenAIClient::new(
            reqwest::Client::new(),
            Some(format!("{}/v1/", server.uri())),
            Credential::ApiKey("sk-test".into()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn chat_parses_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "max_tokens": 500,
                "stream": false,
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hi"},
                ],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "gpt-4o-2024-08-06",
                "choices": [{"message": {"role": "assistant", "content": "Hello!"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 9, "completion_tokens": 2, "total_tokens": 11},
            })))
            .expect(1)
            .mount(&server)
            .await;

        let completion = direct_client(&server).chat(&request(false)).await.unwrap();
        assert_eq!(completion.content, "Hello!");
        assert_eq!(completion.model, "gpt-4o-2024-08-06");
        assert_eq!(completion.usage.unwrap().total_tokens, 11);
    }

    #[tokio::test]
    async fn stream_yields_content_deltas_in_order() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let stream = direct_client(&server)
            .chat_stream(&request(true))
            .await
            .unwrap();
        let deltas: Vec<String> = stream.map(|d| d.unwrap()).collect().await;
        assert_eq!(deltas, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn create_dispatches_on_stream_flag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "ok"}}],
            })))
            .mount(&server)
            .await;

        match direct_client(&server).create(&request(false)).await.unwrap() {
            CompletionOutput::Complete(c) => {
                assert_eq!(c.content, "ok");
                assert_eq!(c.model, "gpt-4o");
                assert!(c.usage.is_none());
            }
            other => panic!("expected a complete response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limit_status_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
            .mount(&server)
            .await;

        let err = direct_client(&server).chat(&request(false)).await.unwrap_err();
        let provider_err = err.downcast_ref::<ProviderError>().unwrap();
        assert!(matches!(
            provider_err,
            ProviderError::RateLimited { retry_after_ms: 2000 }
        ));
    }

    #[tokio::test]
    async fn bearer_credential_uses_default_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer gateway-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "via gateway"}}],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAIClient::new(
            reqwest::Client::new(),
            Some(server.uri()),
            Credential::Bearer("gateway-token".into()),
        )
        .unwrap();
        let completion = client.chat(&request(false)).await.unwrap();
        assert_eq!(completion.content, "via gateway");

        let requests = server.received_requests().await.unwrap();
        let auth: Vec<_> = requests[0].headers.get_all("authorization").iter().collect();
        assert_eq!(auth.len(), 1, "placeholder key must not be sent");
    }

    #[test]
    fn default_base_url_without_override() {
        let client = OpenAIClient::new(
            reqwest::Client::new(),
            None,
            Credential::ApiKey("k".into()),
        )
        .unwrap();
        assert_eq!(client.base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn usage_counts_clamp_to_u32() {
        let usage = parse_usage(&json!({
            "prompt_tokens": 5_000_000_000u64,
            "completion_tokens": 7,
        }))
        .unwrap();
        assert_eq!(usage.prompt_tokens, u32::MAX);
        assert_eq!(usage.completion_tokens, 7);
        assert_eq!(usage.total_tokens, 0);
        assert!(parse_usage(&serde_json::Value::Null).is_none());
    }
}
