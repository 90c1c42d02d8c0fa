use gemini::{config::Config, logging, processor::Processor, shutdown};
use std::process::ExitCode;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::error;

const TEXT_PROMPT: &str = "Tell me about AI";
const IMAGE_PATH: &str = "./test.png";

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = logging::init() {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let signals = shutdown::cancel_on_signal(cancel.clone());

    let processor = match Processor::connect(&config) {
        Ok(processor) => processor,
        Err(e) => {
            error!(error = %e, "failed to initialize AI client");
            return ExitCode::FAILURE;
        }
    };

    let mut stdout = tokio::io::stdout();
    let mut failed = false;

    if let Err(e) = processor
        .process_text(TEXT_PROMPT, &mut stdout, &cancel)
        .await
    {
        error!(error = %e, "failed to process text");
        failed = true;
    }
    failed |= !end_line(&mut stdout).await;

    if let Err(e) = processor
        .process_image(IMAGE_PATH, &mut stdout, &cancel)
        .await
    {
        error!(error = %e, "failed to process image");
        failed = true;
    }
    failed |= !end_line(&mut stdout).await;

    processor.close().await;
    cancel.cancel();
    let _ = signals.await;

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Terminates the current answer with a newline. Returns false if stdout
/// could not be written.
async fn end_line<W: AsyncWrite + Unpin>(out: &mut W) -> bool {
    let result = match out.write_all(b"\n").await {
        Ok(()) => out.flush().await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        error!(error = %e, "failed to write to stdout");
        return false;
    }
    true
}
