//! Mock provider implementation for testing.

use super::{
    ImageFile, ImageGenerationParams, ImageItem, ImageProvider, ImageStreamEvent, ProviderError,
    ProviderStream, StreamParams,
};
use async_trait::async_trait;
use std::sync::Mutex;

/// A call received by [`MockImageProvider`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Generate(ImageGenerationParams),
    Edit {
        params: ImageGenerationParams,
        images: Vec<ImageFile>,
    },
    Stream(StreamParams),
}

/// One scripted step of a mock stream.
#[derive(Debug, Clone)]
pub enum MockStreamStep {
    Event(ImageStreamEvent),
    Fail(String),
}

/// Mock image provider: returns scripted results and records every call.
#[derive(Default)]
pub struct MockImageProvider {
    items: Vec<ImageItem>,
    stream: Vec<MockStreamStep>,
    failure: Option<String>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockImageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items returned by `generate` and `edit`.
    pub fn with_items(mut self, items: Vec<ImageItem>) -> Self {
        self.items = items;
        self
    }

    /// Steps replayed by `generate_stream`.
    pub fn with_stream(mut self, steps: Vec<MockStreamStep>) -> Self {
        self.stream = steps;
        self
    }

    /// Make every operation fail with an API error.
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    fn record(&self, call: RecordedCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn result(&self) -> Result<Vec<ImageItem>, ProviderError> {
        match &self.failure {
            Some(message) => Err(ProviderError::ApiError(message.clone())),
            None => Ok(self.items.clone()),
        }
    }
}

#[async_trait]
impl ImageProvider for MockImageProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn generate(
        &self,
        params: &ImageGenerationParams,
    ) -> Result<Vec<ImageItem>, ProviderError> {
        self.record(RecordedCall::Generate(params.clone()));
        self.result()
    }

    async fn edit(
        &self,
        params: &ImageGenerationParams,
        images: Vec<ImageFile>,
    ) -> Result<Vec<ImageItem>, ProviderError> {
        self.record(RecordedCall::Edit {
            params: params.clone(),
            images,
        });
        self.result()
    }

    async fn generate_stream(
        &self,
        params: &StreamParams,
    ) -> Result<ProviderStream, ProviderError> {
        self.record(RecordedCall::Stream(params.clone()));

        if let Some(message) = &self.failure {
            return Err(ProviderError::ApiError(message.clone()));
        }

        let steps: Vec<Result<ImageStreamEvent, ProviderError>> = self
            .stream
            .iter()
            .map(|step| match step {
                MockStreamStep::Event(event) => Ok(event.clone()),
                MockStreamStep::Fail(message) => {
                    Err(ProviderError::NetworkError(message.clone()))
                }
            })
            .collect();

        Ok(Box::pin(tokio_stream::iter(steps)))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        match &self.failure {
            Some(message) => Err(ProviderError::NotConfigured(message.clone())),
            None => Ok(()),
        }
    }
}
