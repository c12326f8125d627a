//! Chat-completion providers and the fallback chain that strings them together.
//!
//! Every provider speaks the OpenAI-compatible `/chat/completions` dialect.
//! A [`FallbackChain`] tries its providers in order and returns the first
//! non-empty answer.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::{load_prompt_template, Config};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OPENROUTER_MODEL: &str = "deepseek/deepseek-r1-0528:free";
pub const SILICONFLOW_BASE_URL: &str = "https://api.siliconflow.cn/v1";
pub const SILICONFLOW_MODEL: &str = "deepseek-ai/DeepSeek-V3.1";
pub const MOONSHOT_BASE_URL: &str = "https://api.moonshot.cn/v1";
pub const MOONSHOT_MODEL: &str = "kimi-k2-0711-preview";

const REWRITE_TEMPERATURE: f32 = 0.8;
const TITLE_TEMPERATURE: f32 = 0.6;

#[derive(thiserror::Error, Debug)]
pub enum LlmError {
    #[error("{provider}: request failed: {source}")]
    Http {
        provider: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider}: API returned {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider}: response contained no content")]
    EmptyResponse { provider: String },

    #[error("No providers configured")]
    NoProviders,

    #[error("All providers failed. {}", format_failures(.0))]
    Exhausted(Vec<ProviderFailure>),
}

/// One provider's error inside an exhausted chain
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: String,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

fn format_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Human-readable provider name, used in logs and error messages.
    fn name(&self) -> &str;

    /// Sends one system + user exchange and returns the assistant's text.
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Provider for any endpoint implementing the OpenAI chat-completions API
pub struct OpenAiCompatible {
    name: String,
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: Option<f32>,
    extra_headers: Vec<(&'static str, String)>,
}

impl OpenAiCompatible {
    pub fn new(
        name: impl Into<String>,
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: None,
            extra_headers: Vec::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.extra_headers.push((name, value.into()));
        self
    }

    pub fn openrouter(client: Client, api_key: impl Into<String>) -> Self {
        Self::new("OpenRouter", client, OPENROUTER_BASE_URL, api_key, OPENROUTER_MODEL)
            .with_header(
                "HTTP-Referer",
                "https://github.com/xiaohongshu-batch-processor",
            )
            .with_header("X-Title", "Xiaohongshu Batch Processor")
    }

    pub fn siliconflow(client: Client, api_key: impl Into<String>) -> Self {
        Self::new(
            "SiliconFlow",
            client,
            SILICONFLOW_BASE_URL,
            api_key,
            SILICONFLOW_MODEL,
        )
    }

    pub fn moonshot(client: Client, api_key: impl Into<String>, temperature: f32) -> Self {
        Self::new("Moonshot", client, MOONSHOT_BASE_URL, api_key, MOONSHOT_MODEL)
            .with_temperature(temperature)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
        };

        let http_err = |source| LlmError::Http {
            provider: self.name.clone(),
            source,
        };

        let mut builder = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request);
        for (name, value) in &self.extra_headers {
            builder = builder.header(*name, value);
        }

        let response = builder.send().await.map_err(http_err)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            return Err(LlmError::Status {
                provider: self.name.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let chat_response = response.json::<ChatResponse>().await.map_err(http_err)?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| LlmError::EmptyResponse {
                provider: self.name.clone(),
            })
    }
}

/// Ordered list of providers, tried one after another
#[derive(Default)]
pub struct FallbackChain {
    providers: Vec<Box<dyn ChatProvider>>,
}

impl FallbackChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, provider: impl ChatProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        if self.providers.is_empty() {
            return Err(LlmError::NoProviders);
        }

        let mut failures = Vec::new();
        for (i, provider) in self.providers.iter().enumerate() {
            match provider.complete(system, user).await {
                Ok(text) => {
                    if i > 0 {
                        tracing::info!("{} answered after {} failed provider(s)", provider.name(), i);
                    }
                    return Ok(text);
                }
                Err(e) => {
                    tracing::warn!("{} failed: {}", provider.name(), e);
                    failures.push(ProviderFailure {
                        provider: provider.name().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Err(LlmError::Exhausted(failures))
    }
}

/// Rewrites body text and generates titles with the configured providers
pub struct ContentWriter {
    rewrite_chain: FallbackChain,
    title_chain: FallbackChain,
    rewrite_prompt: String,
    title_prompt: String,
}

impl ContentWriter {
    pub fn new(
        rewrite_chain: FallbackChain,
        title_chain: FallbackChain,
        rewrite_prompt: impl Into<String>,
        title_prompt: impl Into<String>,
    ) -> Self {
        Self {
            rewrite_chain,
            title_chain,
            rewrite_prompt: rewrite_prompt.into(),
            title_prompt: title_prompt.into(),
        }
    }

    /// Builds the production chains: OpenRouter, SiliconFlow, then Moonshot for
    /// rewriting (skipping providers without keys), Moonshot alone for titles.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        let mut rewrite_chain = FallbackChain::new();
        if let Some(key) = &config.openrouter_api_key {
            rewrite_chain = rewrite_chain.push(OpenAiCompatible::openrouter(client.clone(), key));
        }
        if let Some(key) = &config.siliconflow_api_key {
            rewrite_chain = rewrite_chain.push(OpenAiCompatible::siliconflow(client.clone(), key));
        }
        rewrite_chain = rewrite_chain.push(OpenAiCompatible::moonshot(
            client.clone(),
            &config.moonshot_api_key,
            REWRITE_TEMPERATURE,
        ));

        let title_chain = FallbackChain::new().push(OpenAiCompatible::moonshot(
            client,
            &config.moonshot_api_key,
            TITLE_TEMPERATURE,
        ));

        tracing::debug!(
            "Rewrite providers: {}",
            rewrite_chain.provider_names().join(" -> ")
        );

        Ok(Self::new(
            rewrite_chain,
            title_chain,
            load_prompt_template(&config.rewrite_prompt_path()),
            load_prompt_template(&config.title_prompt_path()),
        ))
    }

    pub async fn rewrite(&self, text: &str) -> Result<String, LlmError> {
        self.rewrite_chain.complete(&self.rewrite_prompt, text).await
    }

    pub async fn generate_title(&self, text: &str) -> Result<String, LlmError> {
        let title = self.title_chain.complete(&self.title_prompt, text).await?;
        Ok(title.trim().to_string())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Provider that replays a fixed answer, or fails, and counts its calls
    pub(crate) struct ScriptedProvider {
        pub name: String,
        pub answer: Option<String>,
        pub calls: Arc<AtomicUsize>,
    }

    impl ScriptedProvider {
        pub fn ok(name: &str, answer: &str) -> Self {
            Self {
                name: name.to_string(),
                answer: Some(answer.to_string()),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn failing(name: &str) -> Self {
            Self {
                name: name.to_string(),
                answer: None,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn complete(&self, _system: &str, user: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.answer {
                Some(answer) => Ok(answer.replace("{input}", user)),
                None => Err(LlmError::Status {
                    provider: self.name.clone(),
                    status: 503,
                    body: "overloaded".to_string(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_chain_returns_first_success() {
        let first = ScriptedProvider::ok("A", "from A");
        let second = ScriptedProvider::ok("B", "from B");
        let second_calls = second.calls.clone();

        let chain = FallbackChain::new().push(first).push(second);
        assert_eq!(chain.complete("sys", "text").await.unwrap(), "from A");
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chain_falls_through_to_last_provider() {
        let a = ScriptedProvider::failing("A");
        let b = ScriptedProvider::failing("B");
        let c = ScriptedProvider::ok("C", "rewritten: {input}");
        let (a_calls, b_calls) = (a.calls.clone(), b.calls.clone());

        let chain = FallbackChain::new().push(a).push(b).push(c);
        assert_eq!(
            chain.complete("sys", "hello").await.unwrap(),
            "rewritten: hello"
        );
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_chain_exhausted_lists_every_provider() {
        let chain = FallbackChain::new()
            .push(ScriptedProvider::failing("OpenRouter"))
            .push(ScriptedProvider::failing("SiliconFlow"))
            .push(ScriptedProvider::failing("Moonshot"));

        let err = chain.complete("sys", "text").await.unwrap_err();
        match &err {
            LlmError::Exhausted(failures) => assert_eq!(failures.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
        let msg = err.to_string();
        assert!(msg.contains("OpenRouter"));
        assert!(msg.contains("SiliconFlow"));
        assert!(msg.contains("Moonshot"));
    }

    #[tokio::test]
    async fn test_empty_chain_is_an_error() {
        let chain = FallbackChain::new();
        assert!(chain.provider_names().is_empty());
        assert!(matches!(
            chain.complete("sys", "text").await,
            Err(LlmError::NoProviders)
        ));
    }

    #[tokio::test]
    async fn test_generate_title_is_trimmed() {
        let writer = ContentWriter::new(
            FallbackChain::new().push(ScriptedProvider::ok("R", "body")),
            FallbackChain::new().push(ScriptedProvider::ok("T", "  夏日穿搭指南\n")),
            "rewrite",
            "title",
        );
        assert_eq!(writer.generate_title("body").await.unwrap(), "夏日穿搭指南");
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let provider = OpenAiCompatible::new("X", Client::new(), "http://localhost:1/v1/", "k", "m");
        assert_eq!(provider.endpoint(), "http://localhost:1/v1/chat/completions");
    }

    #[test]
    fn test_request_omits_missing_temperature() {
        let request = ChatRequest {
            model: "m",
            messages: vec![Message {
                role: "user",
                content: "hi",
            }],
            temperature: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("temperature").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_response_parsing_tolerates_null_content() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#)
                .unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }

    /// Serves one canned HTTP response on a local port. The handle yields the
    /// raw request as received.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&request[..end]).to_lowercase();
                    let content_length = head
                        .lines()
                        .find_map(|line| line.strip_prefix("content-length:"))
                        .and_then(|value| value.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + content_length {
                        break;
                    }
                }
            }

            let response = format!(
                "{}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&request).into_owned()
        });

        (format!("http://{}/v1", addr), handle)
    }

    fn local_provider(base_url: &str) -> OpenAiCompatible {
        let client = Client::builder().no_proxy().build().unwrap();
        OpenAiCompatible::new("Local", client, base_url, "test-key", "test-model")
    }

    #[tokio::test]
    async fn test_complete_sends_auth_and_extra_headers() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"改写后的正文"}}]}"#,
        )
        .await;
        let provider = local_provider(&base_url)
            .with_temperature(0.6)
            .with_header("X-Title", "Batch Publisher");

        let answer = provider.complete("system prompt", "原文").await.unwrap();
        assert_eq!(answer, "改写后的正文");

        let request = server.await.unwrap();
        let lower = request.to_lowercase();
        assert!(lower.starts_with("post /v1/chat/completions "));
        assert!(lower.contains("authorization: bearer test-key"));
        assert!(lower.contains("x-title: batch publisher"));
        assert!(request.contains(r#""model":"test-model""#));
        assert!(request.contains(r#""temperature":0.6"#));
        assert!(request.contains("system prompt"));
    }

    #[tokio::test]
    async fn test_complete_maps_error_status() {
        let (base_url, server) =
            serve_once("HTTP/1.1 500 Internal Server Error", r#"{"error":"boom"}"#).await;

        let err = local_provider(&base_url).complete("sys", "text").await.unwrap_err();
        match err {
            LlmError::Status {
                provider,
                status,
                body,
            } => {
                assert_eq!(provider, "Local");
                assert_eq!(status, 500);
                assert!(body.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_complete_without_choices_is_empty_response() {
        let (base_url, server) = serve_once("HTTP/1.1 200 OK", "{}").await;

        let result = local_provider(&base_url).complete("sys", "text").await;
        assert!(matches!(result, Err(LlmError::EmptyResponse { .. })));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_complete_blank_content_is_empty_response() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"  \n\t "}}]}"#,
        )
        .await;

        let result = local_provider(&base_url).complete("sys", "text").await;
        assert!(matches!(result, Err(LlmError::EmptyResponse { .. })));
        server.await.unwrap();
    }

    fn config_with_keys(
        openrouter: Option<&str>,
        siliconflow: Option<&str>,
        prompt_dir: &std::path::Path,
    ) -> Config {
        Config {
            openrouter_api_key: openrouter.map(String::from),
            siliconflow_api_key: siliconflow.map(String::from),
            moonshot_api_key: "moonshot-key".to_string(),
            input_dir: ".".into(),
            output_dir: "新生成文件".into(),
            processed_dir: "已处理文件".into(),
            prompt_dir: prompt_dir.to_path_buf(),
            folder_delay: Duration::from_secs(5),
            retry_delay: Duration::from_secs(2),
            max_retries: 3,
            filter: crate::FilterKind::default(),
            border_size: 20,
        }
    }

    #[test]
    fn test_from_config_skips_providers_without_keys() {
        let dir = TempDir::new().unwrap();

        let writer =
            ContentWriter::from_config(&config_with_keys(None, Some("sf-key"), dir.path())).unwrap();
        assert_eq!(writer.rewrite_chain.provider_names(), vec!["SiliconFlow", "Moonshot"]);
        assert_eq!(writer.title_chain.provider_names(), vec!["Moonshot"]);

        let writer = ContentWriter::from_config(&config_with_keys(
            Some("or-key"),
            Some("sf-key"),
            dir.path(),
        ))
        .unwrap();
        assert_eq!(
            writer.rewrite_chain.provider_names(),
            vec!["OpenRouter", "SiliconFlow", "Moonshot"]
        );

        let writer =
            ContentWriter::from_config(&config_with_keys(None, None, dir.path())).unwrap();
        assert_eq!(writer.rewrite_chain.provider_names(), vec!["Moonshot"]);
    }

    #[test]
    fn test_from_config_loads_prompt_templates() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(crate::config::REWRITE_PROMPT_FILE), "改写提示").unwrap();

        let writer =
            ContentWriter::from_config(&config_with_keys(None, None, dir.path())).unwrap();
        assert_eq!(writer.rewrite_prompt, "改写提示");
        assert_eq!(writer.title_prompt, "");
    }
}
