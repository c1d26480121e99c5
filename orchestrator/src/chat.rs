use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

use banter_common::debug;
use banter_common::protocol::{ChatRequest, ConversationTurn};

/// Network or endpoint failure. Never retried by the conversation.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("chat transport error: {0}")]
    Transport(String),
    #[error("chat endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Transport(err.to_string())
    }
}

/// Trait abstracting the chat-completion endpoint. Enables mock-based testing
/// without network calls.
pub trait ChatBackend: Send + Sync {
    /// Send the full history and return the raw response body, unparsed.
    fn complete(&self, history: &[ConversationTurn]) -> Result<String, ChatError>;
}

impl<T: ChatBackend + ?Sized> ChatBackend for Arc<T> {
    fn complete(&self, history: &[ConversationTurn]) -> Result<String, ChatError> {
        (**self).complete(history)
    }
}

/// OpenAI-compatible endpoint over blocking HTTP. Bearer auth is optional.
pub struct HttpChatClient {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpChatClient {
    /// No request timeout is layered on top of the client's own.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, ChatError> {
        let client = reqwest::blocking::Client::builder().build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client,
        })
    }
}

impl ChatBackend for HttpChatClient {
    fn complete(&self, history: &[ConversationTurn]) -> Result<String, ChatError> {
        debug!(
            "[chat] POST {} ({} messages, model={})",
            self.endpoint,
            history.len(),
            self.model
        );

        let body = ChatRequest {
            model: &self.model,
            messages: history,
        };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let res = request.send()?;
        let status = res.status();
        let text = res.text()?;
        if !status.is_success() {
            return Err(ChatError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        debug!("[chat] Response received ({} bytes)", text.len());
        Ok(text)
    }
}

/// Mock backend returning predefined bodies in order, cycling when exhausted.
/// Keeps a copy of every history it is sent.
pub struct MockChatBackend {
    responses: Vec<String>,
    index: AtomicUsize,
    requests: Mutex<Vec<Vec<ConversationTurn>>>,
}

impl MockChatBackend {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            index: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Wrap each content string in a chat-completion envelope.
    pub fn with_contents<S: AsRef<str>>(contents: &[S]) -> Self {
        Self::new(contents.iter().map(|c| completion_body(c.as_ref())).collect())
    }

    /// Histories sent so far, oldest first.
    #[cfg(test)]
    pub fn requests(&self) -> Vec<Vec<ConversationTurn>> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl ChatBackend for MockChatBackend {
    fn complete(&self, history: &[ConversationTurn]) -> Result<String, ChatError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(history.to_vec());
        }
        if self.responses.is_empty() {
            return Err(ChatError::Transport(
                "MockChatBackend has no responses configured".into(),
            ));
        }
        let i = self.index.fetch_add(1, Ordering::Relaxed);
        Ok(self.responses[i % self.responses.len()].clone())
    }
}

/// Minimal chat-completion body carrying `content` as the first choice.
pub fn completion_body(content: &str) -> String {
    serde_json::json!({
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
    })
    .to_string()
}

/// Mock backend that fails a configurable number of times before returning responses.
/// Used for testing transport-failure handling.
#[cfg(test)]
pub struct FailingChatBackend {
    fail_count: AtomicUsize,
    responses: Vec<String>,
    call_index: AtomicUsize,
}

#[cfg(test)]
impl FailingChatBackend {
    pub fn new(fail_count: usize, responses: Vec<String>) -> Self {
        Self {
            fail_count: AtomicUsize::new(fail_count),
            responses,
            call_index: AtomicUsize::new(0),
        }
    }
}

#[cfg(test)]
impl ChatBackend for FailingChatBackend {
    fn complete(&self, _history: &[ConversationTurn]) -> Result<String, ChatError> {
        let remaining = self.fail_count.load(Ordering::Relaxed);
        if remaining > 0 {
            self.fail_count.fetch_sub(1, Ordering::Relaxed);
            return Err(ChatError::Status {
                status: 503,
                body: "Simulated outage".into(),
            });
        }
        if self.responses.is_empty() {
            return Err(ChatError::Transport(
                "FailingChatBackend has no responses configured".into(),
            ));
        }
        let i = self.call_index.fetch_add(1, Ordering::Relaxed);
        Ok(self.responses[i % self.responses.len()].clone())
    }
}
