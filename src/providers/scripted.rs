use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    providers::LLMProvider,
    types::{ChatMessage, CompletionRequest, CompletionResponse},
    LLMError,
};

/// Replays a fixed queue of assistant messages, one per completion call.
/// Every request is kept so tests can inspect what the agent sent.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<ChatMessage>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages<I>(messages: I) -> Self
    where
        I: IntoIterator<Item = ChatMessage>,
    {
        Self {
            responses: Mutex::new(messages.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_messages(texts.into_iter().map(ChatMessage::assistant))
    }

    pub fn push(&self, message: ChatMessage) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(message);
        }
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let next = self
            .responses
            .lock()
            .map_err(|_| LLMError::Provider("scripted provider lock poisoned".to_string()))?
            .pop_front();

        match next {
            Some(message) => Ok(CompletionResponse {
                message,
                usage: None,
            }),
            None => Err(LLMError::Provider("no more scripted responses".to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
