use std::sync::Arc;

use async_trait::async_trait;

use crate::request::ContentRequest;
use crate::result::{ContentError, GeneratedContent};

/// Strategy for writing a dunning message.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn generate(&self, request: &ContentRequest) -> Result<GeneratedContent, ContentError>;
}

#[async_trait]
impl<T> ContentGenerator for Arc<T>
where
    T: ContentGenerator + ?Sized,
{
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn generate(&self, request: &ContentRequest) -> Result<GeneratedContent, ContentError> {
        (**self).generate(request).await
    }
}
