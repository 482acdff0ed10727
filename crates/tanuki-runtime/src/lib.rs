//! GitLab webhook event processor.
//!
//! Turns a webhook delivery into an [`Instruction`], serializes work per issue
//! through an [`IssueLockTable`], drives the assistant CLI through an
//! [`tanuki_provider::AiExecutor`] and reports back through GitLab comments.

pub mod config;
pub mod context;
pub mod instruction;
pub mod lock;
pub mod processor;
mod prompts;
mod render;

pub use config::{ProcessorConfig, ProviderConfig};
pub use context::EventContext;
pub use instruction::{Instruction, Scenario};
pub use lock::{IssueLockGuard, IssueLockTable};
pub use processor::{EventProcessor, ProcessOutcome, ProcessStatus};
