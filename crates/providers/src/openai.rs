use crate::{ChatMessage, EmbedResponse, EmbeddingProvider, LlmProvider, ProviderError};
use bytes::Bytes;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Settings for any endpoint speaking the OpenAI REST dialect (OpenRouter, LM Studio, Ollama).
#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    /// Base URL including the version segment, e.g. `https://openrouter.ai/api/v1`.
    pub base_url: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub chat_model: String,
    pub timeout: Duration,
    /// Attribution headers (`HTTP-Referer`, `X-Title`) some gateways use for rate limits.
    pub site_url: Option<String>,
    pub site_name: Option<String>,
}

#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    cfg: Arc<OpenAiConfig>,
}

impl OpenAiProvider {
    pub fn new(cfg: OpenAiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            cfg: Arc::new(cfg),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, mut builder: RequestBuilder) -> RequestBuilder {
        if let Some(key) = &self.cfg.api_key {
            builder = builder.bearer_auth(key);
        }
        if let Some(url) = self.cfg.site_url.as_deref().filter(|s| !s.is_empty()) {
            builder = builder.header("HTTP-Referer", url);
        }
        if let Some(name) = self.cfg.site_name.as_deref().filter(|s| !s.is_empty()) {
            builder = builder.header("X-Title", name);
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Bytes, ProviderError> {
        let resp = self.authorize(builder).send().await.map_err(map_reqwest)?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await.unwrap_or(Bytes::from_static(b""));
        check_status(status, &body)?;
        Ok(body)
    }
}

/// Non-2xx responses become [`ProviderError::Status`] carrying the body text.
fn check_status(status: u16, body: &[u8]) -> Result<(), ProviderError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(ProviderError::Status {
            status,
            body: String::from_utf8_lossy(body).into_owned(),
        })
    }
}

/// Vectors in input order; the API may return them out of order.
fn decode_embeddings(body: &[u8], expected: usize) -> Result<Vec<Vec<f32>>, ProviderError> {
    let mut parsed: EmbeddingApiResponse = serde_json::from_slice(body)
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    parsed.data.sort_by_key(|d| d.index);
    if parsed.data.len() != expected {
        return Err(ProviderError::MalformedResponse(format!(
            "{} embeddings returned for {} inputs",
            parsed.data.len(),
            expected
        )));
    }
    Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Vec<Choice>,
}

fn decode_chat(body: &[u8]) -> Result<String, ProviderError> {
    let parsed: ChatApiResponse = serde_json::from_slice(body)
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ProviderError::MalformedResponse("response had no choices".into()))
}

fn map_reqwest(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else {
        ProviderError::RequestFailed(err.to_string())
    }
}

#[derive(Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait::async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        #[derive(Serialize)]
        struct EmbedRequest<'a> {
            model: &'a str,
            input: &'a [String],
        }

        if texts.is_empty() {
            return Ok(EmbedResponse { vectors: vec![] });
        }

        debug!(model = %self.cfg.embedding_model, inputs = texts.len(), "embedding request");
        let body = EmbedRequest {
            model: &self.cfg.embedding_model,
            input: texts,
        };
        let body = self
            .send(self.client.post(self.endpoint("embeddings")).json(&body))
            .await?;
        Ok(EmbedResponse {
            vectors: decode_embeddings(&body, texts.len())?,
        })
    }

    fn model_id(&self) -> String {
        format!("openai:{}", self.cfg.embedding_model)
    }

    fn dimension(&self) -> usize {
        self.cfg.embedding_dimension
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        #[derive(Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: &'a [ChatMessage],
            temperature: f32,
            max_tokens: u32,
        }
        debug!(
            model = %self.cfg.chat_model,
            messages = messages.len(),
            max_tokens,
            "chat completion request"
        );
        let body = ChatRequest {
            model: &self.cfg.chat_model,
            messages,
            temperature,
            max_tokens,
        };
        let body = self
            .send(self.client.post(self.endpoint("chat/completions")).json(&body))
            .await?;
        decode_chat(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses_keep_the_body() {
        assert!(check_status(200, b"{}").is_ok());
        match check_status(402, b"Insufficient credits") {
            Err(ProviderError::Status { status, body }) => {
                assert_eq!(status, 402);
                assert_eq!(body, "Insufficient credits");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(check_status(503, b"").unwrap_err().is_transient());
    }

    #[test]
    fn embeddings_are_returned_in_input_order() {
        let body = br#"{"data": [
            {"index": 1, "embedding": [0.0, 1.0]},
            {"index": 0, "embedding": [1.0, 0.0]}
        ]}"#;
        let vectors = decode_embeddings(body, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(matches!(
            decode_embeddings(body, 3),
            Err(ProviderError::MalformedResponse(_))
        ));
    }

    #[test]
    fn chat_reply_is_the_first_choice() {
        let body = br#"{"choices": [{"message": {"role": "assistant", "content": "Hello"}}]}"#;
        assert_eq!(decode_chat(body).unwrap(), "Hello");
        let bad: [&[u8]; 3] = [
            br#"{"choices": []}"#,
            br#"{"choices": [{"message": {}}]}"#,
            b"not json",
        ];
        for body in bad {
            assert!(matches!(decode_chat(body), Err(ProviderError::MalformedResponse(_))));
        }
    }

    #[test]
    fn endpoints_join_the_base_url() {
        let provider = OpenAiProvider::new(OpenAiConfig {
            api_key: None,
            base_url: "http://localhost:1234/v1/".into(),
            embedding_model: "nomic-embed".into(),
            embedding_dimension: 768,
            chat_model: "mistral".into(),
            timeout: Duration::from_secs(5),
            site_url: None,
            site_name: None,
        })
        .unwrap();
        assert_eq!(
            provider.endpoint("chat/completions"),
            "http://localhost:1234/v1/chat/completions"
        );
        assert_eq!(provider.model_id(), "openai:nomic-embed");
    }
}
