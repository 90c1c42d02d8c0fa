//! Retrying execution of a streaming request.
//!
//! A call moves through `Idle -> Attempting -> (Backoff -> Attempting)* ->
//! Succeeded | Failed`. Cancellation is observed at every point where the call
//! can suspend: while streaming and while backing off.

use super::stream::forward_text;
use super::{Completion, Error, error::CancelPoint};
use crate::v1beta::{
    request::Request,
    rest::{self, StreamContent},
};
use derive_new::new;
use derive_setters::Setters;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Bounds and pacing for retried attempts.
#[derive(Debug, Clone, PartialEq, Eq, new, Setters)]
#[setters(prefix = "with_")]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    #[new(value = "3")]
    max_attempts: u32,
    #[new(value = "Duration::from_secs(1)")]
    initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Delay before the attempt with zero-based index `attempt`.
    ///
    /// The first retry (`attempt == 1`) waits twice the initial backoff.
    pub fn backoff(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.initial_backoff.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }
}

#[derive(Debug)]
enum State {
    Idle,
    Attempting { attempt: u32 },
    Backoff { attempt: u32 },
    Succeeded(Completion),
    Failed(Error),
}

/// Runs `request` against `model`, retrying attempts that produce no content.
pub(crate) async fn execute<S, W>(
    model: &S,
    request: &Request,
    policy: &RetryPolicy,
    writer: &mut W,
    cancel: &CancellationToken,
) -> Result<Completion, Error>
where
    S: StreamContent + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let max_attempts = policy.max_attempts().max(1);
    let mut last_error: Option<rest::Error> = None;
    let mut state = State::Idle;

    loop {
        state = match state {
            State::Idle => State::Attempting { attempt: 0 },
            State::Attempting { attempt } => {
                if cancel.is_cancelled() {
                    State::Failed(Error::Cancelled(CancelPoint::BeforeAttempt))
                } else {
                    match attempt_once(model, request, writer, cancel).await {
                        Err(fatal) => State::Failed(fatal),
                        Ok(Attempt::Content(completion)) => State::Succeeded(Completion {
                            attempts: attempt + 1,
                            ..completion
                        }),
                        Ok(Attempt::Empty(error)) => {
                            if let Some(error) = error {
                                last_error = Some(error);
                            }
                            if attempt + 1 < max_attempts {
                                State::Backoff {
                                    attempt: attempt + 1,
                                }
                            } else {
                                State::Failed(match last_error.take() {
                                    Some(source) => Error::Exhausted {
                                        attempts: max_attempts,
                                        source,
                                    },
                                    None => Error::NoContent {
                                        attempts: max_attempts,
                                    },
                                })
                            }
                        }
                    }
                }
            }
            State::Backoff { attempt } => {
                let delay = policy.backoff(attempt);
                info!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    previous_error = last_error.as_ref().map(tracing::field::display),
                    "retrying text processing"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => State::Failed(Error::Cancelled(CancelPoint::Backoff)),
                    _ = tokio::time::sleep(delay) => State::Attempting { attempt },
                }
            }
            State::Succeeded(completion) => return Ok(completion),
            State::Failed(error) => return Err(error),
        };
    }
}

enum Attempt {
    Content(Completion),
    Empty(Option<rest::Error>),
}

async fn attempt_once<S, W>(
    model: &S,
    request: &Request,
    writer: &mut W,
    cancel: &CancellationToken,
) -> Result<Attempt, Error>
where
    S: StreamContent + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled(CancelPoint::Stream)),
        opened = model.open_stream(request.clone()) => match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "failed to open response stream");
                return Ok(Attempt::Empty(Some(e)));
            }
        },
    };

    let report = forward_text(stream, writer, cancel).await?;
    if !report.had_content() {
        return Ok(Attempt::Empty(report.interrupted));
    }
    if let Some(e) = &report.interrupted {
        warn!(error = %e, chunks = report.chunks, "output truncated by stream error");
    }
    Ok(Attempt::Content(Completion {
        attempts: 1,
        chunks: report.chunks,
        interrupted: report.interrupted,
    }))
}
