//! Model interaction: send the review prompt and collect the answer.
//!
//! [`ModelProvider`] is the seam between the orchestrator and whatever
//! generates text. [`LlmModelProvider`] adapts edgequake-llm; tests script
//! their own implementation.
//!
//! No retries happen here. A provider failure becomes
//! [`ReviewError::ModelCallFailed`](crate::error::ReviewError::ModelCallFailed)
//! with the provider's own message.

use crate::config::ReviewConfig;
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use edgequake_llm::traits::StreamChunk;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use futures::StreamExt;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio_stream::Stream;
use tracing::{debug, info};

/// Provider used when none is named.
pub const DEFAULT_PROVIDER: &str = "gemini";

/// Ordered text chunks, terminated by the end of the stream.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ModelError>> + Send>>;

/// A failed model call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    /// The provider could not be created for this model.
    #[error("LLM provider '{provider}' is not configured: {hint}")]
    NotConfigured { provider: String, hint: String },

    /// The call or the stream failed; the message is the provider's.
    #[error("{0}")]
    Call(String),
}

/// One call to a model.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    /// Ask for a token stream; providers without streaming answer in one piece.
    pub stream: bool,
}

/// What a provider hands back.
pub enum ModelReply {
    Text(String),
    Stream(TextStream),
}

impl fmt::Debug for ModelReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelReply::Text(t) => f.debug_tuple("Text").field(&t.len()).finish(),
            ModelReply::Stream(_) => f.write_str("Stream(<chunks>)"),
        }
    }
}

/// Anything that turns a prompt into text for a given model id.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn generate(&self, request: ModelRequest<'_>) -> Result<ModelReply, ModelError>;
}

/// The accumulated answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedText {
    pub text: String,
    pub chunks: usize,
}

/// Drain a reply into one string, concatenating chunks in arrival order.
///
/// An error item aborts the whole call: partial text is discarded.
pub async fn collect_reply(
    reply: ModelReply,
    progress: Option<&ProgressCallback>,
) -> Result<CollectedText, ModelError> {
    match reply {
        ModelReply::Text(text) => {
            if let Some(cb) = progress {
                cb.on_chunk(text.len(), text.len());
            }
            Ok(CollectedText { text, chunks: 1 })
        }
        ModelReply::Stream(mut stream) => {
            let mut text = String::new();
            let mut chunks = 0usize;
            while let Some(item) = stream.next().await {
                let chunk = item?;
                chunks += 1;
                text.push_str(&chunk);
                if let Some(cb) = progress {
                    cb.on_chunk(chunk.len(), text.len());
                }
            }
            debug!("Stream finished: {} chunks, {} bytes", chunks, text.len());
            Ok(CollectedText { text, chunks })
        }
    }
}

/// [`ModelProvider`] over edgequake-llm.
///
/// A pre-built provider from the config is used for every model id;
/// otherwise one is created per call from the provider name and the model id,
/// reading the provider's API key from the environment.
pub struct LlmModelProvider {
    provider_name: String,
    fixed: Option<Arc<dyn LLMProvider>>,
    options: CompletionOptions,
}

impl fmt::Debug for LlmModelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmModelProvider")
            .field("provider_name", &self.provider_name)
            .field("fixed", &self.fixed.as_ref().map(|_| "<dyn LLMProvider>"))
            .finish()
    }
}

impl LlmModelProvider {
    pub fn from_config(config: &ReviewConfig) -> Self {
        Self {
            provider_name: config
                .provider_name
                .clone()
                .unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
            fixed: config.provider.clone(),
            options: build_options(config),
        }
    }

    fn provider_for(&self, model: &str) -> Result<Arc<dyn LLMProvider>, ModelError> {
        if let Some(ref provider) = self.fixed {
            return Ok(Arc::clone(provider));
        }
        ProviderFactory::create_llm_provider(&self.provider_name, model).map_err(|e| {
            ModelError::NotConfigured {
                provider: self.provider_name.clone(),
                hint: format!("{e}"),
            }
        })
    }
}

#[async_trait]
impl ModelProvider for LlmModelProvider {
    async fn generate(&self, request: ModelRequest<'_>) -> Result<ModelReply, ModelError> {
        let provider = self.provider_for(request.model)?;
        let messages = vec![ChatMessage::user(request.prompt)];

        // `stream()` ignores CompletionOptions.
        if request.stream && provider.supports_tool_streaming() {
            info!("Streaming review from {} ({})", self.provider_name, request.model);
            let stream = provider
                .chat_with_tools_stream(&messages, &[], None, Some(&self.options))
                .await
                .map_err(|e| ModelError::Call(e.to_string()))?;
            let text = stream.filter_map(|item| async move {
                match item {
                    Ok(StreamChunk::Content(text)) if !text.is_empty() => Some(Ok(text)),
                    Ok(_) => None,
                    Err(e) => Some(Err(ModelError::Call(e.to_string()))),
                }
            });
            return Ok(ModelReply::Stream(Box::pin(text)));
        }

        info!("Requesting review from {} ({})", self.provider_name, request.model);
        let response = provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| ModelError::Call(e.to_string()))?;
        debug!(
            "{} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(ModelReply::Text(response.content))
    }
}

/// Build `CompletionOptions` from the review config.
fn build_options(config: &ReviewConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ReviewProgressCallback;
    use edgequake_llm::{LLMResponse, LlmError};
    use futures::stream::{self, BoxStream};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Lengths(Mutex<Vec<(usize, usize)>>);

    impl ReviewProgressCallback for Lengths {
        fn on_chunk(&self, chunk_len: usize, total_len: usize) {
            self.0.lock().unwrap().push((chunk_len, total_len));
        }
    }

    fn chunks(items: Vec<Result<&'static str, ModelError>>) -> ModelReply {
        ModelReply::Stream(Box::pin(stream::iter(
            items.into_iter().map(|r| r.map(str::to_string)),
        )))
    }

    #[test]
    fn build_options_defaults() {
        let opts = build_options(&ReviewConfig::default());
        assert_eq!(opts.temperature, Some(0.2));
        assert_eq!(opts.max_tokens, Some(8192));
    }

    #[tokio::test]
    async fn stream_is_concatenated_in_arrival_order() {
        let lengths = Arc::new(Lengths::default());
        let cb: ProgressCallback = lengths.clone();
        let got = collect_reply(chunks(vec![Ok("{\"a\":"), Ok("1"), Ok("}")]), Some(&cb))
            .await
            .unwrap();
        assert_eq!(got.text, "{\"a\":1}");
        assert_eq!(got.chunks, 3);
        assert_eq!(*lengths.0.lock().unwrap(), vec![(5, 5), (1, 6), (1, 7)]);
    }

    #[tokio::test]
    async fn error_mid_stream_fails_the_call() {
        let err = collect_reply(
            chunks(vec![Ok("partial"), Err(ModelError::Call("connection reset".into()))]),
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "connection reset");
    }

    #[tokio::test]
    async fn empty_stream_yields_empty_text() {
        let got = collect_reply(chunks(vec![]), None).await.unwrap();
        assert_eq!(got.text, "");
        assert_eq!(got.chunks, 0);
    }

    #[tokio::test]
    async fn single_text_counts_as_one_chunk() {
        let got = collect_reply(ModelReply::Text("hello".into()), None).await.unwrap();
        assert_eq!(got, CollectedText { text: "hello".into(), chunks: 1 });
    }

    /// Records the options of every call and streams a fixed answer.
    #[derive(Default)]
    struct RecordingProvider {
        seen: Mutex<Vec<Option<CompletionOptions>>>,
    }

    impl RecordingProvider {
        fn record(&self, options: Option<&CompletionOptions>) {
            self.seen.lock().unwrap().push(options.cloned());
        }
    }

    #[async_trait]
    impl LLMProvider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        fn model(&self) -> &str {
            "recording-model"
        }

        fn max_context_length(&self) -> usize {
            32_000
        }

        async fn complete(&self, _prompt: &str) -> edgequake_llm::Result<LLMResponse> {
            Err(LlmError::NotSupported("complete".into()))
        }

        async fn complete_with_options(
            &self,
            _prompt: &str,
            options: &CompletionOptions,
        ) -> edgequake_llm::Result<LLMResponse> {
            self.record(Some(options));
            Err(LlmError::NotSupported("complete".into()))
        }

        async fn chat(
            &self,
            _messages: &[ChatMessage],
            options: Option<&CompletionOptions>,
        ) -> edgequake_llm::Result<LLMResponse> {
            self.record(options);
            Err(LlmError::ApiError("no single-shot answers here".into()))
        }

        async fn chat_with_tools_stream(
            &self,
            _messages: &[ChatMessage],
            _tools: &[edgequake_llm::ToolDefinition],
            _tool_choice: Option<edgequake_llm::ToolChoice>,
            options: Option<&CompletionOptions>,
        ) -> edgequake_llm::Result<BoxStream<'static, edgequake_llm::Result<StreamChunk>>> {
            self.record(options);
            let items = vec![
                Ok(StreamChunk::ThinkingContent {
                    text: "hmm".into(),
                    tokens_used: None,
                    budget_total: None,
                }),
                Ok(StreamChunk::Content("{\"a\":".into())),
                Ok(StreamChunk::Content("1}".into())),
                Ok(StreamChunk::Finished {
                    reason: "stop".into(),
                    ttft_ms: None,
                }),
            ];
            Ok(Box::pin(stream::iter(items)))
        }

        fn supports_streaming(&self) -> bool {
            true
        }

        fn supports_tool_streaming(&self) -> bool {
            true
        }
    }

    fn recording_adapter(provider: &Arc<RecordingProvider>) -> LlmModelProvider {
        let config = ReviewConfig::builder()
            .provider(provider.clone())
            .temperature(0.5)
            .max_tokens(1024)
            .build()
            .unwrap();
        LlmModelProvider::from_config(&config)
    }

    #[tokio::test]
    async fn streamed_call_carries_sampling_options() {
        let provider = Arc::new(RecordingProvider::default());
        let adapter = recording_adapter(&provider);

        let reply = adapter
            .generate(ModelRequest { model: "m", prompt: "review this", stream: true })
            .await
            .unwrap();
        let got = collect_reply(reply, None).await.unwrap();

        // only content chunks reach the accumulator
        assert_eq!(got.text, "{\"a\":1}");
        assert_eq!(got.chunks, 2);

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let options = seen[0].as_ref().expect("options passed to the stream");
        assert_eq!(options.temperature, Some(0.5));
        assert_eq!(options.max_tokens, Some(1024));
    }

    #[tokio::test]
    async fn single_shot_call_carries_sampling_options() {
        let provider = Arc::new(RecordingProvider::default());
        let adapter = recording_adapter(&provider);

        let err = adapter
            .generate(ModelRequest { model: "m", prompt: "review this", stream: false })
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Call(_)));

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].as_ref().and_then(|o| o.max_tokens), Some(1024));
    }
}
