//! ProSearch core: an iterative web research loop built on `graph_flow`.
//!
//! A run generates search queries for a question, fans them out as parallel
//! web searches, reflects on the gathered evidence to find knowledge gaps,
//! loops with follow-up queries until the evidence is sufficient or the loop
//! budget is spent, and finally synthesizes a cited answer.

pub mod citations;
mod config;
mod error;
pub mod fanout;
mod finalize;
pub mod llm;
mod logging;
pub mod metrics;
pub mod prompts;
pub mod query;
pub mod reflection;
pub mod search;
mod security;
pub mod state;
mod tasks;
mod telemetry;
mod trace;
mod web_research;
mod workflow;

pub use config::{Config, ConfigLoader, LlmConfig, LoggingConfig, ResearchConfig, SearchConfig};
pub use error::{ResearchError, TaskError};
pub use finalize::finalize_answer;
pub use llm::{CompletionRequest, LanguageModel, OpenRouterModel, RetryPolicy};
pub use logging::{RunLogInput, log_run_completion};
pub use query::{MAX_QUERY_CHARS, generate_query, truncate_query};
pub use reflection::{Route, evaluate_research, reflect};
pub use search::{SearchHit, SearchProvider, SearchRequest, TavilyClient};
pub use security::{Credentials, SecretValue, require_env};
pub use state::{
    Message, QueryGenerationState, QueryItem, Reflection, ResearchState, Role, Source,
    WebSearchOutcome, WebSearchState,
};
pub use tasks::{
    FinalizeAnswerTask, GenerateQueryTask, ReflectionTask, ResearchServices, WebResearchTask,
};
pub use telemetry::init_telemetry;
pub use trace::{
    TraceCollector, TraceEvent, TraceStep, TraceSummary, persist_trace, render_workflow_mermaid,
};
pub use web_research::{format_result, web_research};
pub use workflow::{ResearchAgent, RunOptions, RunOutcome};
