//! OpenAI image provider implementation.
//!
//! Generation and editing go through the Images API; streamed generation
//! goes through the Responses API with the `image_generation` tool, whose
//! server-sent events are decoded incrementally and relayed over a channel.

use super::sse::SseDecoder;
use super::{
    ImageFile, ImageGenerationParams, ImageItem, ImageProvider, ImageStreamEvent, ProviderError,
    ProviderStream, StreamParams,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// OpenAI API base URL.
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI provider configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Secret<String>,
    pub base_url: String,
    /// Model for the Images API (generate/edit).
    pub image_model: String,
    /// Model driving the `image_generation` tool in streamed responses.
    pub stream_model: String,
}

/// OpenAI image provider.
pub struct OpenAiImageProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiImageProvider {
    // No request timeout: a hung upstream call blocks its request.
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, ProviderError> {
        let response = request
            .bearer_auth(self.config.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        check_status(response).await
    }

    async fn parse_images(response: Response) -> Result<Vec<ImageItem>, ProviderError> {
        let body: ImagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ApiError(format!("Failed to parse response: {}", e)))?;
        Ok(body.data)
    }
}

#[async_trait]
impl ImageProvider for OpenAiImageProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn generate(
        &self,
        params: &ImageGenerationParams,
    ) -> Result<Vec<ImageItem>, ProviderError> {
        let request = GenerationsRequest {
            model: &self.config.image_model,
            prompt: &params.prompt,
            n: params.n,
            size: &params.size,
            quality: params.quality.as_deref(),
            background: params.background.as_deref(),
        };

        tracing::debug!(
            model = %self.config.image_model,
            n = params.n,
            size = %params.size,
            "Sending image generation request to OpenAI"
        );

        let response = self
            .send(self.client.post(self.api_url("images/generations")).json(&request))
            .await?;

        Self::parse_images(response).await
    }

    async fn edit(
        &self,
        params: &ImageGenerationParams,
        images: Vec<ImageFile>,
    ) -> Result<Vec<ImageItem>, ProviderError> {
        let image_count = images.len();

        let mut form = Form::new()
            .text("model", self.config.image_model.clone())
            .text("prompt", params.prompt.clone())
            .text("n", params.n.to_string())
            .text("size", params.size.clone());
        if let Some(quality) = &params.quality {
            form = form.text("quality", quality.clone());
        }
        if let Some(background) = &params.background {
            form = form.text("background", background.clone());
        }

        for image in images {
            let part = Part::bytes(image.bytes)
                .file_name(image.file_name)
                .mime_str(&image.mime_type)
                .map_err(|e| {
                    ProviderError::InvalidRequest(format!(
                        "Invalid MIME type '{}': {}",
                        image.mime_type, e
                    ))
                })?;
            form = form.part("image[]", part);
        }

        tracing::debug!(
            model = %self.config.image_model,
            n = params.n,
            image_count,
            "Sending image edit request to OpenAI"
        );

        let response = self
            .send(self.client.post(self.api_url("images/edits")).multipart(form))
            .await?;

        Self::parse_images(response).await
    }

    async fn generate_stream(
        &self,
        params: &StreamParams,
    ) -> Result<ProviderStream, ProviderError> {
        let input = if params.reference_images.is_empty() {
            ResponseInput::Text(&params.prompt)
        } else {
            let mut content = vec![InputContent::InputText {
                text: &params.prompt,
            }];
            content.extend(
                params
                    .reference_images
                    .iter()
                    .map(|image_url| InputContent::InputImage { image_url }),
            );
            ResponseInput::Messages(vec![InputMessage {
                role: "user",
                content,
            }])
        };

        let request = ResponsesRequest {
            model: &self.config.stream_model,
            input,
            tools: vec![ImageGenerationTool {
                kind: "image_generation",
                partial_images: params.partial_images,
            }],
            stream: true,
        };

        tracing::debug!(
            model = %self.config.stream_model,
            partial_images = params.partial_images,
            reference_count = params.reference_images.len(),
            "Starting streaming image request to OpenAI"
        );

        let response = self
            .send(self.client.post(self.api_url("responses")).json(&request))
            .await?;

        // Create channel for streaming
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => {
                        for data in decoder.push(&bytes) {
                            if let Some(item) = decode_event(&data) {
                                let failed = item.is_err();
                                if tx.send(item).await.is_err() {
                                    tracing::debug!("Stream consumer dropped, stopping relay");
                                    return;
                                }
                                if failed {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Upstream image stream failed");
                        let _ = tx
                            .send(Err(ProviderError::NetworkError(e.to_string())))
                            .await;
                        return;
                    }
                }
            }

            if let Some(item) = decoder.finish().as_deref().and_then(decode_event) {
                let _ = tx.send(item).await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)) as ProviderStream)
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.config.api_key.expose_secret().is_empty() {
            return Err(ProviderError::NotConfigured(
                "OpenAI API key not configured".to_string(),
            ));
        }

        self.send(self.client.get(self.api_url("models"))).await?;
        Ok(())
    }
}

/// Map a non-success response to a provider error, preferring the API's own
/// error message over the raw body.
async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited);
    }

    let message = serde_json::from_str::<ApiErrorResponse>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);

    Err(ProviderError::ApiError(format!(
        "OpenAI API error {}: {}",
        status, message
    )))
}

/// Turn one SSE payload into a relayed event. Unknown event types and
/// unparseable payloads yield `None`.
fn decode_event(data: &str) -> Option<Result<ImageStreamEvent, ProviderError>> {
    match serde_json::from_str::<StreamEvent>(data) {
        Ok(event) => event.into_image_event(),
        Err(e) => {
            tracing::debug!(error = %e, "Skipping unparseable stream event");
            None
        }
    }
}

// ============================================================================
// OpenAI API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerationsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    quality: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    background: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageItem>,
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: ResponseInput<'a>,
    tools: Vec<ImageGenerationTool>,
    stream: bool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ResponseInput<'a> {
    Text(&'a str),
    Messages(Vec<InputMessage<'a>>),
}

#[derive(Debug, Serialize)]
struct InputMessage<'a> {
    role: &'a str,
    content: Vec<InputContent<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputContent<'a> {
    InputText { text: &'a str },
    InputImage { image_url: &'a str },
}

#[derive(Debug, Serialize)]
struct ImageGenerationTool {
    #[serde(rename = "type")]
    kind: &'static str,
    partial_images: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamEvent {
    #[serde(rename = "response.image_generation_call.partial_image")]
    PartialImage { partial_image_b64: String },

    #[serde(rename = "response.output_item.done")]
    OutputItemDone { item: OutputItem },

    #[serde(rename = "response.image_generation_call")]
    ImageGenerationCall {
        #[serde(default)]
        result: Option<String>,
    },

    #[serde(rename = "response.failed")]
    Failed { response: FailedResponse },

    #[serde(rename = "response.incomplete")]
    Incomplete { response: IncompleteResponse },

    #[serde(rename = "error")]
    Error { message: String },

    #[serde(other)]
    Other,
}

impl StreamEvent {
    fn into_image_event(self) -> Option<Result<ImageStreamEvent, ProviderError>> {
        match self {
            StreamEvent::PartialImage { partial_image_b64 } => {
                Some(Ok(ImageStreamEvent::Partial(partial_image_b64)))
            }
            StreamEvent::OutputItemDone { item } if item.kind == "image_generation_call" => {
                item.result.map(|b64| Ok(ImageStreamEvent::Final(b64)))
            }
            StreamEvent::ImageGenerationCall { result } => {
                result.map(|b64| Ok(ImageStreamEvent::Final(b64)))
            }
            StreamEvent::Failed { response } => Some(Err(ProviderError::ApiError(
                response
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "Response failed".to_string()),
            ))),
            StreamEvent::Incomplete { response } => Some(Err(ProviderError::ApiError(
                match response.incomplete_details.and_then(|d| d.reason) {
                    Some(reason) => format!("Response incomplete: {}", reason),
                    None => "Response incomplete".to_string(),
                },
            ))),
            StreamEvent::Error { message } => Some(Err(ProviderError::ApiError(message))),
            StreamEvent::OutputItemDone { .. } | StreamEvent::Other => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FailedResponse {
    #[serde(default)]
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct IncompleteResponse {
    #[serde(default)]
    incomplete_details: Option<IncompleteDetails>,
}

#[derive(Debug, Deserialize)]
struct IncompleteDetails {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OpenAiImageProvider {
        OpenAiImageProvider::new(OpenAiConfig {
            api_key: Secret::new("test-key".to_string()),
            base_url: format!("{}/v1", server.uri()),
            image_model: "gpt-image-1".to_string(),
            stream_model: "gpt-4.1".to_string(),
        })
    }

    fn params() -> ImageGenerationParams {
        ImageGenerationParams {
            prompt: "a red fox".to_string(),
            n: 2,
            size: "1024x1024".to_string(),
            quality: Some("high".to_string()),
            background: None,
        }
    }

    async fn last_request_body(server: &MockServer) -> Vec<u8> {
        let requests = server.received_requests().await.unwrap();
        requests.last().unwrap().body.clone()
    }

    #[tokio::test]
    async fn generate_posts_json_and_returns_items() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "created": 1,
                "data": [{"b64_json": "AAA"}, {"b64_json": "BBB"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let items = provider(&server).generate(&params()).await.unwrap();
        assert_eq!(items, vec![ImageItem::base64("AAA"), ImageItem::base64("BBB")]);

        let body: serde_json::Value =
            serde_json::from_slice(&last_request_body(&server).await).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "model": "gpt-image-1",
                "prompt": "a red fox",
                "n": 2,
                "size": "1024x1024",
                "quality": "high"
            })
        );
    }

    #[tokio::test]
    async fn edit_uploads_images_as_multipart_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/edits"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"b64_json": "EDITED"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let images = vec![
            ImageFile {
                file_name: "first.png".to_string(),
                mime_type: "image/png".to_string(),
                bytes: b"one".to_vec(),
            },
            ImageFile {
                file_name: "second.jpg".to_string(),
                mime_type: "image/jpeg".to_string(),
                bytes: b"two".to_vec(),
            },
        ];

        let items = provider(&server).edit(&params(), images).await.unwrap();
        assert_eq!(items, vec![ImageItem::base64("EDITED")]);

        let body = String::from_utf8_lossy(&last_request_body(&server).await).to_string();
        let first = body.find("filename=\"first.png\"").unwrap();
        let second = body.find("filename=\"second.jpg\"").unwrap();
        assert!(first < second);
        assert!(body.contains("name=\"image[]\""));
        assert!(body.contains("a red fox"));
        assert!(body.to_ascii_lowercase().contains("content-type: image/jpeg"));
    }

    #[tokio::test]
    async fn api_errors_surface_provider_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"message": "Invalid size", "type": "invalid_request_error"}
            })))
            .mount(&server)
            .await;

        let err = provider(&server).generate(&params()).await.unwrap_err();
        match err {
            ProviderError::ApiError(message) => assert!(message.contains("Invalid size")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limit_is_reported_distinctly() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = provider(&server).generate(&params()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited));
    }

    #[tokio::test]
    async fn stream_relays_partial_and_final_images_in_order() {
        let server = MockServer::start().await;
        let sse = concat!(
            "event: response.created\n",
            "data: {\"type\":\"response.created\",\"response\":{}}\n\n",
            "event: response.image_generation_call.partial_image\n",
            "data: {\"type\":\"response.image_generation_call.partial_image\",\"partial_image_index\":0,\"partial_image_b64\":\"P0\"}\n\n",
            "data: {\"type\":\"response.image_generation_call.partial_image\",\"partial_image_index\":1,\"partial_image_b64\":\"P1\"}\n\n",
            "data: {\"type\":\"response.output_item.done\",\"item\":{\"type\":\"message\"}}\n\n",
            "data: {\"type\":\"response.output_item.done\",\"item\":{\"type\":\"image_generation_call\",\"result\":\"FINAL\"}}\n\n",
            "data: {\"type\":\"response.completed\",\"response\":{}}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let stream = provider(&server)
            .generate_stream(&StreamParams {
                prompt: "a red fox".to_string(),
                partial_images: 2,
                reference_images: vec![],
            })
            .await
            .unwrap();

        let events: Vec<ImageStreamEvent> = stream.map(|e| e.unwrap()).collect().await;
        assert_eq!(
            events,
            vec![
                ImageStreamEvent::Partial("P0".to_string()),
                ImageStreamEvent::Partial("P1".to_string()),
                ImageStreamEvent::Final("FINAL".to_string()),
            ]
        );

        let body: serde_json::Value =
            serde_json::from_slice(&last_request_body(&server).await).unwrap();
        assert_eq!(body["model"], "gpt-4.1");
        assert_eq!(body["input"], "a red fox");
        assert_eq!(body["stream"], true);
        assert_eq!(
            body["tools"],
            serde_json::json!([{"type": "image_generation", "partial_images": 2}])
        );
    }

    #[tokio::test]
    async fn stream_embeds_reference_images_as_input_images() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("", "text/event-stream"))
            .mount(&server)
            .await;

        let stream = provider(&server)
            .generate_stream(&StreamParams {
                prompt: "make it blue".to_string(),
                partial_images: 0,
                reference_images: vec!["data:image/png;base64,AAAA".to_string()],
            })
            .await
            .unwrap();
        assert_eq!(stream.count().await, 0);

        let body: serde_json::Value =
            serde_json::from_slice(&last_request_body(&server).await).unwrap();
        assert_eq!(
            body["input"],
            serde_json::json!([{
                "role": "user",
                "content": [
                    {"type": "input_text", "text": "make it blue"},
                    {"type": "input_image", "image_url": "data:image/png;base64,AAAA"}
                ]
            }])
        );
    }

    #[tokio::test]
    async fn stream_error_event_ends_relay_with_error() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"type\":\"response.image_generation_call.partial_image\",\"partial_image_b64\":\"P0\"}\n\n",
            "data: {\"type\":\"error\",\"code\":\"server_error\",\"message\":\"boom\"}\n\n",
            "data: {\"type\":\"response.image_generation_call.partial_image\",\"partial_image_b64\":\"P1\"}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let items: Vec<_> = provider(&server)
            .generate_stream(&StreamParams {
                prompt: "a red fox".to_string(),
                partial_images: 1,
                reference_images: vec![],
            })
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Ok(ImageStreamEvent::Partial(b64)) if b64 == "P0"));
        assert!(matches!(&items[1], Err(ProviderError::ApiError(m)) if m == "boom"));
    }

    #[test]
    fn legacy_final_event_is_recognised() {
        let event = decode_event(r#"{"type":"response.image_generation_call","result":"R"}"#);
        assert!(matches!(event, Some(Ok(ImageStreamEvent::Final(b64))) if b64 == "R"));
    }

    #[test]
    fn incomplete_response_is_an_error() {
        let event = decode_event(
            r#"{"type":"response.incomplete","response":{"incomplete_details":{"reason":"max_output_tokens"}}}"#,
        );
        assert!(matches!(
            event,
            Some(Err(ProviderError::ApiError(m))) if m.contains("max_output_tokens")
        ));

        let event = decode_event(r#"{"type":"response.incomplete","response":{}}"#);
        assert!(matches!(event, Some(Err(ProviderError::ApiError(_)))));
    }

    #[test]
    fn unrelated_events_are_ignored() {
        assert!(decode_event(r#"{"type":"response.in_progress","response":{}}"#).is_none());
        assert!(decode_event("not json").is_none());
    }

    #[tokio::test]
    async fn health_check_requires_api_key() {
        let server = MockServer::start().await;
        let provider = OpenAiImageProvider::new(OpenAiConfig {
            api_key: Secret::new(String::new()),
            base_url: server.uri(),
            image_model: "gpt-image-1".to_string(),
            stream_model: "gpt-4.1".to_string(),
        });

        assert!(matches!(
            provider.health_check().await,
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
