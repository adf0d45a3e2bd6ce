//! Finalization services
//!
//! Leaves first: transcript cleaning and completion estimation (injected
//! collaborators), the LLM client and its retrying extraction stage, usage
//! accounting, the pipeline that orders them, and the dispatcher that
//! starts the pipeline out-of-band.

pub mod completion;
pub mod dispatcher;
pub mod extraction;
pub mod llm_client;
pub mod pipeline;
pub mod transcript;
pub mod usage_accountant;

pub use completion::{CompletionEstimator, ReportedProgressEstimator};
pub use dispatcher::{
    spawn_channel_worker, ChannelTransport, DispatchError, DispatchStats, DispatchStatsSnapshot,
    DispatchTransport, FinalizationDispatcher, HttpTransport,
};
pub use extraction::{ExtractionInput, ExtractionStage, RetryPolicy};
pub use llm_client::{ChatCompletionsClient, LlmClient, LlmError};
pub use pipeline::{
    FinalizationPipeline, FinalizationReport, FinalizeOutcome, PipelineError, Stage, SummaryStatus,
};
pub use transcript::{count_user_words, StandardCleaner, TranscriptCleaner};
pub use usage_accountant::{UsageAccountant, UsageStatus};
