//! Runtime layer: configuration, worker pool, and pipeline assembly.
//!
//! The pieces stack top-down:
//!
//! - **[`RuntimeConfig`]** - tunables for processors and the pool, with
//!   environment overlays
//! - **[`WorkerPool`]** - the claim/dispatch/settle loop, N tasks strong
//! - **[`PipelineRunner`]** - wires stores, providers, budget, and event bus
//!   together and owns the pool's lifecycle
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use gleanforge::ingest::PersistInput;
//! use gleanforge::providers::{OpenAiClient, OpenAiConfig};
//! use gleanforge::runtimes::{PipelineRunner, RuntimeConfig};
//!
//! # async fn example() -> miette::Result<()> {
//! let client = OpenAiClient::new(OpenAiConfig::new(std::env::var("OPENAI_API_KEY").unwrap()))?;
//! let runner = PipelineRunner::builder()
//!     .with_config(RuntimeConfig::from_env())
//!     .with_openai(client)
//!     .build()
//!     .await?;
//!
//! let receipt = runner
//!     .ingest(PersistInput::text("notes", "Pipelines are built from jobs."))
//!     .await?;
//! println!("persisted {}", receipt.document_id);
//!
//! runner.run_until_idle().await?;
//! runner.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod runner;
pub mod worker;

pub use config::RuntimeConfig;
pub use runner::{PipelineBuilder, PipelineRunner, RunnerError};
pub use worker::WorkerPool;
