//! The external classification model seam.

use async_trait::async_trait;

use ai_client::{AiError, ChatRequest, Message, OpenAiClient};

use crate::batch::Batch;

/// System instructions sent with every batch.
const SYSTEM_PROMPT: &str = "You are a web traffic analyst. You receive a JSON array of network \
requests captured while browsing one site. Identify (1) the site's technology stack \
(frameworks, hosting, CDNs, platforms, libraries) and (2) the analytics events being sent \
(provider, event name, page, request). Respond with a single JSON object of the form \
{\"tech_stack\": [{\"name\", \"category\", \"confidence\", \"evidence\"}], \
\"analytics_events\": [{\"provider\", \"event_name\", \"page_url\", \"request_url\", \"notes\"}]}. \
Confidence is a number between 0 and 1. Respond with JSON only, no prose.";

/// Classifies one batch of captured calls.
#[async_trait]
pub trait ClassifierModel: Send + Sync {
    /// Submit a batch; returns the model's raw text response.
    async fn classify(&self, batch: &Batch) -> Result<String, AiError>;
}

/// OpenAI-backed classifier.
pub struct OpenAiClassifier {
    client: OpenAiClient,
    model: String,
    max_tokens: u32,
}

impl OpenAiClassifier {
    pub fn new(client: OpenAiClient) -> Self {
        Self {
            client,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 4096,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl ClassifierModel for OpenAiClassifier {
    async fn classify(&self, batch: &Batch) -> Result<String, AiError> {
        let request = ChatRequest::new(&self.model)
            .message(Message::system(SYSTEM_PROMPT))
            .message(Message::user(batch.serialize()))
            .temperature(0.0)
            .max_tokens(self.max_tokens);

        let response = self.client.chat_completion(request).await?;
        Ok(response.content)
    }
}
