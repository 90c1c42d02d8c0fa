use async_trait::async_trait;
use gemini::processor::{CancelPoint, Error, Processor, ProcessorConfig};
use gemini::v1beta::{
    request::Request,
    response::Response,
    rest::{self, ResponseStream, StreamContent},
};
use serde_json::json;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

enum Script {
    Open(Vec<Result<Response, rest::Error>>),
    Fail(rest::Error),
    Hang,
}

/// Serves one scripted stream per call; unscripted calls get an empty stream.
#[derive(Clone, Default)]
struct Scripted {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl Scripted {
    fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into_iter().collect())),
            requests: Arc::default(),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request_json(&self, index: usize) -> serde_json::Value {
        serde_json::to_value(&self.requests.lock().unwrap()[index]).unwrap()
    }
}

#[async_trait]
impl StreamContent for Scripted {
    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn open_stream(&self, request: Request) -> Result<ResponseStream, rest::Error> {
        self.requests.lock().unwrap().push(request);
        let script = self.scripts.lock().unwrap().pop_front();
        match script.unwrap_or(Script::Open(vec![])) {
            Script::Open(items) => Ok(Box::pin(tokio_stream::iter(items))),
            Script::Fail(e) => Err(e),
            Script::Hang => Ok(Box::pin(tokio_stream::pending::<
                Result<Response, rest::Error>,
            >())),
        }
    }
}

struct BrokenSink;

impl AsyncWrite for BrokenSink {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed")))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn text(value: &str) -> Result<Response, rest::Error> {
    Ok(serde_json::from_value(json!({
        "candidates": [{"content": {"role": "model", "parts": [{"text": value}]}}]
    }))
    .unwrap())
}

fn safety_block() -> Result<Response, rest::Error> {
    Ok(serde_json::from_value(json!({
        "candidates": [{"finishReason": "SAFETY"}]
    }))
    .unwrap())
}

fn api_error(message: &str) -> rest::Error {
    rest::Error::ApiError(message.to_string())
}

/// Captures formatted log lines for the current thread.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogBuffer {
    fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

fn processor(text: Scripted, image: Scripted) -> Processor<Scripted> {
    Processor::new(text, image, ProcessorConfig::default())
}

fn cancel_after(token: &CancellationToken, delay: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        token.cancel();
    });
}

#[tokio::test(start_paused = true)]
async fn single_chunk_succeeds_without_retry() {
    let model = Scripted::new([Script::Open(vec![text("Hello")])]);
    let processor = processor(model.clone(), Scripted::default());
    let mut out: Vec<u8> = Vec::new();

    let completion = processor
        .process_text("hi", &mut out, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(out, b"Hello");
    assert_eq!(completion.attempts, 1);
    assert_eq!(completion.chunks, 1);
    assert!(!completion.is_truncated());
    assert_eq!(model.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn chunks_are_written_in_order() {
    let model = Scripted::new([Script::Open(vec![text("Hel"), text("lo, "), text("world")])]);
    let processor = processor(model, Scripted::default());
    let mut out: Vec<u8> = Vec::new();

    let completion = processor
        .process_text("hi", &mut out, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(String::from_utf8(out).unwrap(), "Hello, world");
    assert_eq!(completion.chunks, 3);
}

#[tokio::test(start_paused = true)]
async fn text_request_carries_generation_settings() {
    let model = Scripted::new([Script::Open(vec![text("ok")])]);
    let processor = processor(model.clone(), Scripted::default());

    processor
        .process_text("Tell me about AI", &mut Vec::<u8>::new(), &CancellationToken::new())
        .await
        .unwrap();

    let json = model.request_json(0);
    assert_eq!(json["contents"][0]["role"], "user");
    assert_eq!(json["contents"][0]["parts"][0]["text"], "Tell me about AI");
    assert_eq!(json["generationConfig"]["topK"], 40);
    assert_eq!(json["generationConfig"]["maxOutputTokens"], 2048);
}

#[tokio::test]
async fn call_spans_record_the_model() {
    let logs = LogBuffer::default();
    let _guard = logs.install();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cat.png");
    std::fs::write(&path, b"png").unwrap();
    let processor = processor(
        Scripted::new([Script::Open(vec![text("ok")])]),
        Scripted::new([Script::Open(vec![text("a cat")])]),
    );

    processor
        .process_text("hi", &mut Vec::<u8>::new(), &CancellationToken::new())
        .await
        .unwrap();
    processor
        .process_image(&path, &mut Vec::<u8>::new(), &CancellationToken::new())
        .await
        .unwrap();

    let output = logs.contents();
    let text_line = output
        .lines()
        .find(|line| line.contains("processing text input"))
        .unwrap();
    let image_line = output
        .lines()
        .find(|line| line.contains("processing image"))
        .unwrap();
    assert!(text_line.contains("model=scripted-model"), "{text_line}");
    assert!(image_line.contains("model=scripted-model"), "{image_line}");
}

#[tokio::test(start_paused = true)]
async fn transport_errors_exhaust_attempts() {
    let model = Scripted::new([
        Script::Fail(api_error("boom 1")),
        Script::Open(vec![Err(api_error("boom 2"))]),
        Script::Open(vec![Err(api_error("boom 3"))]),
    ]);
    let processor = processor(model.clone(), Scripted::default());
    let started = Instant::now();

    let err = processor
        .process_text("hi", &mut Vec::<u8>::new(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("failed to process text after 3 attempts"));
    match err {
        Error::Exhausted {
            attempts,
            source: rest::Error::ApiError(message),
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(message, "boom 3");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(model.calls(), 3);
    // 2s before the second attempt, 4s before the third.
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(6) && waited < Duration::from_millis(6100));
}

#[tokio::test(start_paused = true)]
async fn empty_streams_report_no_content() {
    let model = Scripted::default();
    let processor = processor(model.clone(), Scripted::default());

    let err = processor
        .process_text("hi", &mut Vec::<u8>::new(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NoContent { attempts: 3 }));
    assert_eq!(err.to_string(), "no content generated after 3 attempts");
    assert_eq!(model.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn earlier_error_survives_later_empty_attempt() {
    let model = Scripted::new([Script::Fail(api_error("unavailable"))]);
    let processor = processor(model, Scripted::default());

    let err = processor
        .process_text("hi", &mut Vec::<u8>::new(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Exhausted {
            source: rest::Error::ApiError(ref message),
            ..
        } if message == "unavailable"
    ));
}

#[tokio::test(start_paused = true)]
async fn retry_after_empty_attempt_succeeds() {
    let model = Scripted::new([Script::Open(vec![]), Script::Open(vec![text("Hi")])]);
    let processor = processor(model.clone(), Scripted::default());
    let started = Instant::now();
    let mut out: Vec<u8> = Vec::new();

    let completion = processor
        .process_text("hi", &mut out, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(out, b"Hi");
    assert_eq!(completion.attempts, 2);
    assert_eq!(model.calls(), 2);
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(2) && waited < Duration::from_millis(2100));
}

#[tokio::test(start_paused = true)]
async fn safety_block_is_not_retried() {
    let model = Scripted::new([Script::Open(vec![safety_block()])]);
    let processor = processor(model.clone(), Scripted::default());
    let mut out: Vec<u8> = Vec::new();

    let err = processor
        .process_text("hi", &mut out, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SafetyBlocked(_)));
    assert!(err.to_string().contains("content blocked by safety settings"));
    assert!(out.is_empty());
    assert_eq!(model.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn safety_block_after_empty_attempt_stops_retries() {
    let model = Scripted::new([
        Script::Fail(api_error("flaky")),
        Script::Open(vec![safety_block()]),
    ]);
    let processor = processor(model.clone(), Scripted::default());

    let err = processor
        .process_text("hi", &mut Vec::<u8>::new(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SafetyBlocked(_)));
    assert_eq!(model.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn error_after_content_is_a_truncated_success() {
    let model = Scripted::new([Script::Open(vec![
        text("Hello"),
        Err(api_error("connection reset")),
        text(" never seen"),
    ])]);
    let processor = processor(model.clone(), Scripted::default());
    let mut out: Vec<u8> = Vec::new();

    let completion = processor
        .process_text("hi", &mut out, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(out, b"Hello");
    assert!(completion.is_truncated());
    assert_eq!(completion.chunks, 1);
    assert_eq!(model.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_backoff_stops_retrying() {
    let model = Scripted::new([Script::Open(vec![])]);
    let processor = processor(model.clone(), Scripted::default());
    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_millis(500));

    let err = processor
        .process_text("hi", &mut Vec::<u8>::new(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled(CancelPoint::Backoff)));
    assert!(err.is_cancelled());
    assert_eq!(model.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_while_streaming() {
    let model = Scripted::new([Script::Hang]);
    let processor = processor(model.clone(), Scripted::default());
    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_secs(30));

    let err = processor
        .process_text("hi", &mut Vec::<u8>::new(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled(CancelPoint::Stream)));
    assert_eq!(model.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn already_cancelled_call_never_opens_a_stream() {
    let model = Scripted::new([Script::Open(vec![text("Hello")])]);
    let processor = processor(model.clone(), Scripted::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = processor
        .process_text("hi", &mut Vec::<u8>::new(), &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(model.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn write_failure_aborts_without_retry() {
    let model = Scripted::new([Script::Open(vec![text("Hello")])]);
    let processor = processor(model.clone(), Scripted::default());

    let err = processor
        .process_text("hi", &mut BrokenSink, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Write(_)));
    assert_eq!(model.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn calls_after_close_fail() {
    let model = Scripted::new([Script::Open(vec![text("Hello")])]);
    let processor = processor(model.clone(), Scripted::default());
    processor.close().await;
    processor.close().await;

    let err = processor
        .process_text("hi", &mut Vec::<u8>::new(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Closed));
    assert_eq!(model.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_calls_share_the_client() {
    let model = Scripted::new([
        Script::Open(vec![text("one")]),
        Script::Open(vec![text("two")]),
    ]);
    let processor = processor(model.clone(), Scripted::default());
    let cancel = CancellationToken::new();
    let (mut first, mut second) = (Vec::<u8>::new(), Vec::<u8>::new());

    let (a, b) = tokio::join!(
        processor.process_text("a", &mut first, &cancel),
        processor.process_text("b", &mut second, &cancel),
    );

    assert!(a.is_ok() && b.is_ok());
    let mut outputs = vec![first, second];
    outputs.sort();
    assert_eq!(outputs, vec![b"one".to_vec(), b"two".to_vec()]);
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn image_is_sent_inline_and_streamed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.png");
    std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();

    let image = Scripted::new([Script::Open(vec![text("A tiny "), text("image")])]);
    let processor = processor(Scripted::default(), image.clone());
    let mut out: Vec<u8> = Vec::new();

    let completion = processor
        .process_image(&path, &mut out, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(String::from_utf8(out).unwrap(), "A tiny image");
    assert_eq!(completion.chunks, 2);

    let json = image.request_json(0);
    let inline = &json["contents"][0]["parts"][0]["inlineData"];
    assert_eq!(inline["mimeType"], "image/png");
    assert_eq!(inline["data"], "iVBORw==");
    assert!(json.get("generationConfig").is_none());
}

#[tokio::test]
async fn missing_image_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let image = Scripted::default();
    let processor = processor(Scripted::default(), image.clone());

    let err = processor
        .process_image(
            dir.path().join("missing.png"),
            &mut Vec::<u8>::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ReadImage { .. }));
    assert_eq!(image.calls(), 0);
}

#[tokio::test]
async fn image_stream_error_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.jpg");
    std::fs::write(&path, b"jpeg").unwrap();

    let image = Scripted::new([
        Script::Open(vec![text("partial"), Err(api_error("reset"))]),
        Script::Open(vec![text("second try")]),
    ]);
    let processor = processor(Scripted::default(), image.clone());
    let mut out: Vec<u8> = Vec::new();

    let err = processor
        .process_image(&path, &mut out, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Generation(rest::Error::ApiError(_))));
    assert_eq!(out, b"partial");
    assert_eq!(image.calls(), 1);
    assert_eq!(
        image.request_json(0)["contents"][0]["parts"][0]["inlineData"]["mimeType"],
        "image/jpeg"
    );
}

#[tokio::test]
async fn image_open_failure_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.png");
    std::fs::write(&path, b"png").unwrap();

    let image = Scripted::new([Script::Fail(api_error("403 Forbidden"))]);
    let processor = processor(Scripted::default(), image.clone());

    let err = processor
        .process_image(&path, &mut Vec::<u8>::new(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Generation(_)));
    assert_eq!(image.calls(), 1);
}

#[tokio::test]
async fn empty_image_response_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.png");
    std::fs::write(&path, b"png").unwrap();

    let processor = processor(Scripted::default(), Scripted::default());
    let completion = processor
        .process_image(&path, &mut Vec::<u8>::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(completion.chunks, 0);
}
