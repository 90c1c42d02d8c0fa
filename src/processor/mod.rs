//! Text and image processing on top of the streaming REST client.
//!
//! [`Processor`] owns one model client per task. Each call streams the model's
//! answer into a caller-supplied writer as chunks arrive, so output may be
//! visible even when the call ultimately fails.

mod error;
mod retry;
mod stream;

pub use error::{CancelPoint, Error};
pub use retry::RetryPolicy;

use crate::config::Config;
use crate::v1beta::{
    Content, InlineData, Part, PartData, Role,
    request::{GenerationConfig, Request, SafetySettings},
    rest::{self, StreamContent},
};
use derive_new::new;
use derive_setters::Setters;
use std::path::Path;
use tokio::io::AsyncWrite;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{Span, field::display, info};
use uuid::Uuid;

const DEFAULT_IMAGE_MIME: &str = "image/png";

/// Outcome of a successful call.
#[derive(Debug)]
pub struct Completion {
    /// Attempts used, including the successful one.
    pub attempts: u32,
    /// Chunks that contributed text.
    pub chunks: usize,
    /// Set when the stream broke after text had already been written. The
    /// output is truncated but not retried, since it is already visible.
    pub interrupted: Option<rest::Error>,
}

impl Completion {
    pub fn is_truncated(&self) -> bool {
        self.interrupted.is_some()
    }
}

/// Generation settings applied by [`Processor`].
#[derive(Debug, Clone, new, Setters)]
#[setters(prefix = "with_", into)]
pub struct ProcessorConfig {
    #[new(value = "default_text_generation()")]
    text_generation: GenerationConfig,
    #[new(default)]
    safety_settings: Vec<SafetySettings>,
    #[new(default)]
    retry: RetryPolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_text_generation() -> GenerationConfig {
    GenerationConfig::new()
        .with_temperature(0.7f32)
        .with_top_k(40u32)
        .with_top_p(0.95f32)
        .with_max_output_tokens(2048u32)
}

#[derive(Debug)]
struct Models<S> {
    text: S,
    image: S,
}

/// Streams text and image answers from the generative API.
///
/// Calls may run concurrently; [`Processor::close`] waits for in-flight calls
/// and makes later ones fail with [`Error::Closed`].
#[derive(Debug)]
pub struct Processor<S = rest::Client> {
    models: RwLock<Option<Models<S>>>,
    config: ProcessorConfig,
}

impl Processor<rest::Client> {
    /// Builds REST clients for the configured text and image models.
    pub fn connect(config: &Config) -> Result<Self, Error> {
        Self::connect_with(config, ProcessorConfig::default())
    }

    pub fn connect_with(config: &Config, processor_config: ProcessorConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .user_agent(env!("CARGO_CRATE_NAME"))
            .build()
            .map_err(Error::ClientInit)?;

        let text = rest::Client::new(config.api_key.as_str(), config.text_model.as_str())
            .with_client(http.clone());
        let image = rest::Client::new(config.api_key.as_str(), config.image_model.as_str())
            .with_client(http);

        info!(
            text_model = %config.text_model,
            image_model = %config.image_model,
            "generative client ready"
        );
        Ok(Self::new(text, image, processor_config))
    }
}

impl<S: StreamContent> Processor<S> {
    pub fn new(text: S, image: S, config: ProcessorConfig) -> Self {
        Self {
            models: RwLock::new(Some(Models { text, image })),
            config,
        }
    }

    /// Streams the text model's answer to `input` into `writer`.
    ///
    /// Attempts that produce no text are retried with exponential backoff.
    /// Safety blocks, write failures and cancellation end the call at once.
    #[tracing::instrument(
        skip_all,
        fields(request_id = %Uuid::new_v4(), model = tracing::field::Empty)
    )]
    pub async fn process_text<W>(
        &self,
        input: &str,
        writer: &mut W,
        cancel: &CancellationToken,
    ) -> Result<Completion, Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let guard = self.models.read().await;
        let models = guard.as_ref().ok_or(Error::Closed)?;
        Span::current().record("model", display(models.text.model()));

        info!(input_length = input.len(), "processing text input");

        let request = Request::new(vec![Content::new(
            Some(Role::User),
            vec![Part::new(PartData::Text(input.to_string()))],
        )])
        .with_generation_config(self.config.text_generation.clone())
        .with_safety_settings(self.config.safety_settings.clone());

        let completion =
            retry::execute(&models.text, &request, &self.config.retry, writer, cancel).await?;
        info!(
            attempts = completion.attempts,
            chunks = completion.chunks,
            truncated = completion.is_truncated(),
            "text processed"
        );
        Ok(completion)
    }

    /// Streams the image model's description of the image at `path` into
    /// `writer`. Errors are not retried.
    #[tracing::instrument(
        skip_all,
        fields(
            request_id = %Uuid::new_v4(),
            model = tracing::field::Empty,
            image_path = %path.as_ref().display()
        )
    )]
    pub async fn process_image<W>(
        &self,
        path: impl AsRef<Path>,
        writer: &mut W,
        cancel: &CancellationToken,
    ) -> Result<Completion, Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let path = path.as_ref();
        let guard = self.models.read().await;
        let models = guard.as_ref().ok_or(Error::Closed)?;
        Span::current().record("model", display(models.image.model()));

        info!("processing image");

        let data = tokio::fs::read(path)
            .await
            .map_err(|source| Error::ReadImage {
                path: path.to_path_buf(),
                source,
            })?;
        let request = Request::new(vec![Content::new(
            Some(Role::User),
            vec![Part::new(PartData::InlineData(InlineData::new(
                image_mime_type(path),
                data,
            )))],
        )]);

        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled(CancelPoint::Stream)),
            opened = models.image.open_stream(request) => opened.map_err(Error::Generation)?,
        };
        let report = stream::forward_text(stream, writer, cancel).await?;
        if let Some(e) = report.interrupted {
            return Err(Error::Generation(e));
        }

        info!(chunks = report.chunks, "image processed");
        Ok(Completion {
            attempts: 1,
            chunks: report.chunks,
            interrupted: None,
        })
    }

    /// Releases the model clients once in-flight calls have finished.
    pub async fn close(&self) {
        if self.models.write().await.take().is_some() {
            info!("generative client closed");
        }
    }
}

/// Picks a MIME type from the file extension, falling back to PNG.
fn image_mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("heif") => "image/heif",
        _ => DEFAULT_IMAGE_MIME,
    }
}
