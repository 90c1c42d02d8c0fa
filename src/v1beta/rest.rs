use super::{API_BASE, request, response};
use async_trait::async_trait;
use derive_new::new;
use derive_setters::Setters;
use eventsource_stream::Eventsource;
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::StreamExt;
use tracing::debug;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    ApiError(String),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error("event stream error: {0}")]
    Stream(String),
}

/// Ordered response chunks of one streaming call.
pub type ResponseStream =
    Pin<Box<dyn tokio_stream::Stream<Item = Result<response::Response, Error>> + Send>>;

/// Capability to open a streaming generate-content call against a single model.
///
/// Dropping the returned stream ends the call early.
#[async_trait]
pub trait StreamContent: Send + Sync {
    /// Model name the calls are sent to.
    fn model(&self) -> &str;

    async fn open_stream(&self, request: request::Request) -> Result<ResponseStream, Error>;
}

#[derive(Debug, Clone, new, Setters)]
#[setters(prefix = "with_", into, strip_option)]
pub struct Client {
    #[setters(skip)]
    #[new(into)]
    api_key: String,
    #[setters(skip)]
    #[new(into)]
    model: String,
    #[new(value = "API_BASE.to_string()")]
    api_base: String,
    #[new(value = "reqwest::Client::new()")]
    client: reqwest::Client,
}

impl Client {
    pub fn model(&self) -> &str {
        self.model.trim_start_matches("models/")
    }

    fn stream_url(&self) -> Result<url::Url, Error> {
        let mut url = url::Url::parse(&format!(
            "{api_base}/{model}:streamGenerateContent",
            api_base = self.api_base.trim_end_matches('/'),
            model = self.model(),
        ))?;
        url.query_pairs_mut()
            .append_pair("alt", "sse")
            .append_pair("key", &self.api_key);
        Ok(url)
    }

    pub async fn stream_content(
        &self,
        request: request::Request,
    ) -> Result<impl tokio_stream::Stream<Item = Result<response::Response, Error>> + use<>, Error>
    {
        let url = self.stream_url()?;
        debug!(model = %self.model(), "opening content stream");

        let response = self
            .client
            .post(url)
            .header(reqwest::header::USER_AGENT, env!("CARGO_CRATE_NAME"))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("Failed to read error body: {}", e));
            return Err(Error::ApiError(format!("{status}: {error_body}")));
        }

        Ok(response
            .bytes_stream()
            .eventsource()
            .filter(|event| !matches!(event, Ok(event) if event.data.trim().is_empty()))
            .map(|event| {
                let event = event.map_err(|e| Error::Stream(e.to_string()))?;
                serde_json::from_str::<response::Response>(&event.data).map_err(Error::from)
            }))
    }
}

#[async_trait]
impl StreamContent for Client {
    fn model(&self) -> &str {
        Client::model(self)
    }

    async fn open_stream(&self, request: request::Request) -> Result<ResponseStream, Error> {
        let stream = self.stream_content(request).await?;
        Ok(Box::pin(stream))
    }
}
