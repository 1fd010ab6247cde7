use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::generator::ContentGenerator;
use crate::request::ContentRequest;
use crate::result::{ContentError, GeneratedContent};
use crate::template::TemplateContentGenerator;

/// Tries an optional primary generator under a timeout and falls back to the
/// deterministic templates on any error, timeout, or incomplete output.
///
/// Requests carrying an explicit template skip the primary entirely.
pub struct FallbackContentGenerator {
    primary: Option<Arc<dyn ContentGenerator>>,
    fallback: TemplateContentGenerator,
    timeout: Duration,
}

impl FallbackContentGenerator {
    pub fn new(
        primary: Arc<dyn ContentGenerator>,
        fallback: TemplateContentGenerator,
        timeout: Duration,
    ) -> Self {
        Self {
            primary: Some(primary),
            fallback,
            timeout,
        }
    }

    pub fn template_only(fallback: TemplateContentGenerator) -> Self {
        Self {
            primary: None,
            fallback,
            timeout: Duration::ZERO,
        }
    }

    pub async fn render(&self, request: &ContentRequest) -> GeneratedContent {
        if let (Some(primary), None) = (&self.primary, &request.template) {
            match tokio::time::timeout(self.timeout, primary.generate(request)).await {
                Ok(Ok(content)) if content.is_complete() => return content,
                Ok(Ok(_)) => warn!(
                    generator = primary.name(),
                    step_number = request.step_number,
                    "generator returned incomplete content; using template"
                ),
                Ok(Err(err)) => warn!(
                    generator = primary.name(),
                    step_number = request.step_number,
                    error = %err,
                    "content generation failed; using template"
                ),
                Err(_) => warn!(
                    generator = primary.name(),
                    step_number = request.step_number,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "content generation timed out; using template"
                ),
            }
        } else {
            debug!(step_number = request.step_number, "rendering template content");
        }
        self.fallback.render(request)
    }
}

#[async_trait]
impl ContentGenerator for FallbackContentGenerator {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn generate(&self, request: &ContentRequest) -> Result<GeneratedContent, ContentError> {
        Ok(self.render(request).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::MessageTemplate;
    use payrecover_core::Money;

    struct Failing;
    struct Slow;
    struct Blank;
    struct Fixed;

    #[async_trait]
    impl ContentGenerator for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn generate(&self, _: &ContentRequest) -> Result<GeneratedContent, ContentError> {
            Err(ContentError::Provider {
                status: 500,
                body: "boom".into(),
            })
        }
    }

    #[async_trait]
    impl ContentGenerator for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }
        async fn generate(&self, _: &ContentRequest) -> Result<GeneratedContent, ContentError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(ContentError::Disabled)
        }
    }

    #[async_trait]
    impl ContentGenerator for Blank {
        fn name(&self) -> &'static str {
            "blank"
        }
        async fn generate(&self, _: &ContentRequest) -> Result<GeneratedContent, ContentError> {
            Ok(GeneratedContent {
                subject: String::new(),
                body_html: String::new(),
                body_text: String::new(),
                is_generated_by_ai: true,
            })
        }
    }

    #[async_trait]
    impl ContentGenerator for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }
        async fn generate(&self, _: &ContentRequest) -> Result<GeneratedContent, ContentError> {
            Ok(GeneratedContent {
                subject: "AI subject".into(),
                body_html: "<p>AI body</p>".into(),
                body_text: "AI body".into(),
                is_generated_by_ai: true,
            })
        }
    }

    fn request(step: u32) -> ContentRequest {
        ContentRequest::new(step, Money::new(7900, "usd").unwrap())
    }

    fn wrap(primary: Arc<dyn ContentGenerator>) -> FallbackContentGenerator {
        FallbackContentGenerator::new(
            primary,
            TemplateContentGenerator::new(),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn falls_back_for_every_step_when_primary_errors() {
        let generator = wrap(Arc::new(Failing));
        for step in 1..=7 {
            let content = generator.render(&request(step)).await;
            assert!(content.is_complete(), "step {step}");
            assert!(!content.is_generated_by_ai);
        }
    }

    #[tokio::test]
    async fn falls_back_on_timeout_and_blank_output() {
        assert!(!wrap(Arc::new(Slow)).render(&request(1)).await.is_generated_by_ai);
        let blank = wrap(Arc::new(Blank)).render(&request(2)).await;
        assert!(blank.is_complete());
        assert!(!blank.is_generated_by_ai);
    }

    #[tokio::test]
    async fn uses_primary_when_it_succeeds() {
        let content = wrap(Arc::new(Fixed)).generate(&request(1)).await.unwrap();
        assert_eq!(content.subject, "AI subject");
        assert!(content.is_generated_by_ai);
    }

    #[tokio::test]
    async fn explicit_template_bypasses_primary() {
        let req = request(1).with_template(Some(MessageTemplate {
            subject: "Custom".into(),
            body_html: "<p>Custom body</p>".into(),
        }));
        let content = wrap(Arc::new(Fixed)).render(&req).await;
        assert_eq!(content.subject, "Custom");
        assert!(!content.is_generated_by_ai);
    }

    #[tokio::test]
    async fn template_only_never_calls_out() {
        let generator = FallbackContentGenerator::template_only(TemplateContentGenerator::new());
        let content = generator.render(&request(7)).await;
        assert!(content.is_complete());
    }
}
