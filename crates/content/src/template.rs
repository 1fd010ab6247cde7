//! Deterministic per-step templates.

use async_trait::async_trait;

use crate::generator::ContentGenerator;
use crate::request::{ContentRequest, MessageTemplate};
use crate::result::{ContentError, GeneratedContent};

const DEFAULT_CUSTOMER_NAME: &str = "there";
const DEFAULT_BUSINESS_NAME: &str = "The Team";

/// Built-in `(subject, body_html)` for steps 1..=5.
const BUILT_IN: [(&str, &str); 5] = [
    (
        "Your payment didn't go through",
        "<p>Hi {{name}},</p>\
         <p>Your latest payment of <strong>{{amount}} {{currency}}</strong> was declined. \
         It is usually something small, like an expired card or a temporary hold from the bank.</p>\
         <p>Updating your payment details takes a minute and keeps everything running.</p>\
         <p>Thanks,<br>{{business}}</p>",
    ),
    (
        "Reminder: your payment details need an update",
        "<p>Hi {{name}},</p>\
         <p>We still could not collect <strong>{{amount}} {{currency}}</strong> for your subscription.</p>\
         <p>Please check the card on file so your access is not interrupted.</p>\
         <p>Thanks,<br>{{business}}</p>",
    ),
    (
        "Action needed: your subscription is at risk",
        "<p>Hi {{name}},</p>\
         <p>We have tried several times to charge <strong>{{amount}} {{currency}}</strong> without success.</p>\
         <p>If the payment method is not updated soon, your subscription will be cancelled.</p>\
         <p>{{business}}</p>",
    ),
    (
        "Final notice before your subscription is cancelled",
        "<p>Hi {{name}},</p>\
         <p>This is our last reminder. The payment of <strong>{{amount}} {{currency}}</strong> is still \
         outstanding and your subscription will be cancelled within 48 hours.</p>\
         <p>Update your payment method now to keep your account.</p>\
         <p>{{business}}</p>",
    ),
    (
        "We're sorry to see you go",
        "<p>Hi {{name}},</p>\
         <p>Your subscription was cancelled because <strong>{{amount}} {{currency}}</strong> could not be collected.</p>\
         <p>Your data is still here. You can reactivate any time by adding a valid payment method.</p>\
         <p>We would love to have you back,<br>{{business}}</p>",
    ),
];

/// Renders built-in (or operator-supplied) templates. Never fails.
#[derive(Debug, Clone, Default)]
pub struct TemplateContentGenerator {
    default_business_name: Option<String>,
}

impl TemplateContentGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Business name used when the request does not carry one.
    pub fn with_business_name(mut self, name: impl Into<String>) -> Self {
        self.default_business_name = Some(name.into());
        self
    }

    pub fn render(&self, request: &ContentRequest) -> GeneratedContent {
        let (subject, body) = match &request.template {
            Some(MessageTemplate { subject, body_html })
                if !subject.trim().is_empty() && !body_html.trim().is_empty() =>
            {
                (subject.as_str(), body_html.as_str())
            }
            _ => BUILT_IN[(request.step() - 1) as usize],
        };

        let body_html = self.fill(body, request);
        GeneratedContent {
            subject: self.fill(subject, request),
            body_text: html_to_text(&body_html),
            body_html,
            is_generated_by_ai: false,
        }
    }

    fn fill(&self, text: &str, request: &ContentRequest) -> String {
        let name = non_blank(request.customer_name.as_deref()).unwrap_or(DEFAULT_CUSTOMER_NAME);
        let business = non_blank(request.business_name.as_deref())
            .or(non_blank(self.default_business_name.as_deref()))
            .unwrap_or(DEFAULT_BUSINESS_NAME);

        text.replace("{{name}}", name)
            .replace("{{amount}}", &request.amount.format_major())
            .replace("{{currency}}", request.amount.currency())
            .replace("{{business}}", business)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[async_trait]
impl ContentGenerator for TemplateContentGenerator {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn generate(&self, request: &ContentRequest) -> Result<GeneratedContent, ContentError> {
        Ok(self.render(request))
    }
}

/// Plain-text rendition of an HTML body: tags dropped, block ends become
/// line breaks, common entities decoded.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut tag = String::new();
    let mut in_tag = false;

    for ch in html.chars() {
        match (in_tag, ch) {
            (false, '<') => {
                in_tag = true;
                tag.clear();
            }
            (true, '>') => {
                in_tag = false;
                let name = tag
                    .trim_start_matches('/')
                    .split(|c: char| c.is_whitespace() || c == '/')
                    .next()
                    .unwrap_or("")
                    .to_ascii_lowercase();
                if matches!(name.as_str(), "p" | "br" | "div" | "li" | "tr" | "h1" | "h2" | "h3") {
                    out.push('\n');
                }
            }
            (true, c) => tag.push(c),
            (false, c) => out.push(c),
        }
    }

    let decoded = out
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    decoded
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
