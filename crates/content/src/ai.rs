//! AI-assisted generation through an OpenAI-compatible chat-completions API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::generator::ContentGenerator;
use crate::request::{ContentRequest, MAX_STEP, Tone};
use crate::result::{ContentError, GeneratedContent};
use crate::template::html_to_text;

const SYSTEM_PROMPT: &str = "You write short payment-recovery emails for subscription businesses. \
Answer with a JSON object containing exactly two string fields: \"subject\" and \"body_html\". \
The body uses simple <p> paragraphs, at most four, and never invents links.";

#[derive(Debug, Clone)]
pub struct AiSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub request_timeout: Duration,
}

impl AiSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: api_key.into(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 500,
            request_timeout: Duration::from_secs(10),
        }
    }
}

pub struct AiContentGenerator {
    client: reqwest::Client,
    settings: AiSettings,
}

impl AiContentGenerator {
    pub fn new(settings: AiSettings) -> Result<Self, ContentError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| ContentError::Transport(e.to_string()))?;
        Ok(Self { client, settings })
    }

    fn prompt(request: &ContentRequest) -> String {
        let tone = match request.tone() {
            Tone::Friendly => "friendly and reassuring",
            Tone::Professional => "professional and concise",
            Tone::Urgent => "urgent but polite",
            Tone::WinBack => "warm, inviting the customer to come back",
        };
        format!(
            "Write dunning email {step} of {MAX_STEP} for customer \"{customer}\" who owes {amount} to \"{business}\". \
             Tone: {tone}. Keep it under four short paragraphs.",
            step = request.step(),
            customer = request.customer_name.as_deref().unwrap_or("the customer"),
            amount = request.amount,
            business = request.business_name.as_deref().unwrap_or("our service"),
        )
    }
}

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmailDraft {
    subject: String,
    body_html: String,
}

/// Extracts the drafted email from a chat-completions response body.
pub(crate) fn parse_completion(body: &str) -> Result<GeneratedContent, ContentError> {
    let completion: Completion =
        serde_json::from_str(body).map_err(|e| ContentError::InvalidResponse(e.to_string()))?;
    let content = completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ContentError::InvalidResponse("no choices returned".into()))?;

    let draft: EmailDraft = serde_json::from_str(&content)
        .map_err(|e| ContentError::InvalidResponse(format!("draft is not JSON: {e}")))?;

    let generated = GeneratedContent {
        subject: draft.subject.trim().to_string(),
        body_text: html_to_text(&draft.body_html),
        body_html: draft.body_html,
        is_generated_by_ai: true,
    };
    if !generated.is_complete() {
        return Err(ContentError::InvalidResponse("draft is empty".into()));
    }
    Ok(generated)
}

#[async_trait]
impl ContentGenerator for AiContentGenerator {
    fn name(&self) -> &'static str {
        "ai"
    }

    async fn generate(&self, request: &ContentRequest) -> Result<GeneratedContent, ContentError> {
        let url = format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.settings.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": Self::prompt(request) },
            ],
            "response_format": { "type": "json_object" },
            "max_tokens": self.settings.max_tokens,
            "temperature": 0.7,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ContentError::Timeout(self.settings.request_timeout)
                } else {
                    ContentError::from(e)
                }
            })?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(ContentError::Provider {
                status: status.as_u16(),
                body: text,
            });
        }
        parse_completion(&text)
    }
}
