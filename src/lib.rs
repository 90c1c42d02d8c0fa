//! Streaming command-line client for Google's Gemini API.
//!
//! [`v1beta`] holds the typed wire format and the SSE streaming client.
//! [`processor::Processor`] drives text and image requests on top of it,
//! retrying text requests that produce no output.
//!
//! ## Example
//!
//! ```no_run
//! use gemini::{config::Config, processor::Processor};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load()?;
//! let processor = Processor::connect(&config)?;
//! let cancel = CancellationToken::new();
//!
//! let mut stdout = tokio::io::stdout();
//! let completion = processor
//!     .process_text("Tell me about AI", &mut stdout, &cancel)
//!     .await?;
//! println!("\n{} chunks", completion.chunks);
//! processor.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod processor;
pub mod shutdown;
pub mod v1beta;
