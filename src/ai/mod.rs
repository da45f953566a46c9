//! AI classification of term-matched pages
//!
//! The crawler stages pages into a persisted queue; [`AiPipeline`] drains it
//! one classifier call at a time, with pacing, bounded rate-limit backoff and
//! a cooldown circuit breaker.

mod classifier;
mod pipeline;
mod queue;

pub use classifier::{Classifier, ClassifierError, GeminiClassifier, Verdict};
pub use pipeline::{AiPipeline, PipelineSummary};
pub use queue::{AiQueueItem, AiQueueStore, ItemStatus};
