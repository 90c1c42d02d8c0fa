use super::Error;
use super::error::CancelPoint;
use crate::v1beta::rest::{self, ResponseStream};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What a single pass over a response stream produced.
#[derive(Debug, Default)]
pub(crate) struct StreamReport {
    /// Chunks that contributed text to the sink.
    pub chunks: usize,
    /// Error that ended the stream before the server closed it.
    pub interrupted: Option<rest::Error>,
}

impl StreamReport {
    pub fn had_content(&self) -> bool {
        self.chunks > 0
    }
}

/// Forwards the text of every chunk to `writer` until the stream ends.
///
/// Read and decode errors stop the pass and are reported, not returned.
/// Safety blocks, sink failures and cancellation are returned as errors.
pub(crate) async fn forward_text<W>(
    mut stream: ResponseStream,
    writer: &mut W,
    cancel: &CancellationToken,
) -> Result<StreamReport, Error>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut report = StreamReport::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled(CancelPoint::Stream)),
            next = stream.next() => next,
        };

        let response = match next {
            None => break,
            Some(Ok(response)) => response,
            Some(Err(e)) => {
                warn!(error = %e, chunks = report.chunks, "response stream interrupted");
                report.interrupted = Some(e);
                break;
            }
        };

        if let Some(reason) = response.safety_block() {
            return Err(Error::SafetyBlocked(reason));
        }

        let mut wrote = false;
        for text in response.texts() {
            writer
                .write_all(text.as_bytes())
                .await
                .map_err(Error::Write)?;
            wrote = true;
        }
        if wrote {
            writer.flush().await.map_err(Error::Write)?;
            report.chunks += 1;
        }
    }

    debug!(chunks = report.chunks, "response stream finished");
    Ok(report)
}
