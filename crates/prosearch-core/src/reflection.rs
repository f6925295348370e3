//! Reflection over gathered evidence and the routing decision that follows.

use tracing::info;

use crate::ResearchError;
use crate::config::ResearchConfig;
use crate::fanout::dispatch_follow_up;
use crate::llm::{CREATIVE_TEMPERATURE, CompletionRequest, LanguageModel, RetryPolicy};
use crate::prompts;
use crate::state::{Reflection, ResearchState, WebSearchState};

/// Separator placed between result blocks in the reflection prompt.
pub const SUMMARY_SEPARATOR: &str = "\n\n---\n\n";

/// Where the run goes after a reflection step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Finalize,
    ContinueResearch(Vec<WebSearchState>),
}

impl Route {
    pub fn is_finalize(&self) -> bool {
        matches!(self, Route::Finalize)
    }
}

/// Reasoning model for this run: the state override, else configuration.
pub fn reasoning_model<'a>(state: &'a ResearchState, config: &'a ResearchConfig) -> &'a str {
    state
        .reasoning_model
        .as_deref()
        .unwrap_or(&config.reasoning_model)
}

/// Loop budget for this run: the state override, else configuration.
pub fn max_research_loops(state: &ResearchState, config: &ResearchConfig) -> u32 {
    state.max_research_loops.unwrap_or(config.max_research_loops)
}

/// Evaluate the accumulated results and record the verdict on `state`.
///
/// The loop counter is bumped before the model is consulted, so a failed
/// reflection still counts as a loop. `number_of_ran_queries` is the number
/// of searches completed at this point.
pub async fn reflect(
    state: &mut ResearchState,
    config: &ResearchConfig,
    model: &dyn LanguageModel,
    retry: &RetryPolicy,
) -> Result<Reflection, ResearchError> {
    state.research_loop_count += 1;

    let topic = state.research_topic()?;
    let summaries = state.web_research_result.join(SUMMARY_SEPARATOR);
    let prompt = prompts::reflection(&prompts::current_date(), &topic, &summaries);
    let request = CompletionRequest::structured(
        reasoning_model(state, config),
        prompt,
        CREATIVE_TEMPERATURE,
    );

    let verdict: Reflection = crate::llm::generate_structured(model, &request, retry).await?;

    state.is_sufficient = verdict.is_sufficient;
    state.knowledge_gap = verdict.knowledge_gap.clone();
    state.follow_up_queries = verdict.follow_up_queries.clone();
    state.number_of_ran_queries = state.search_query.len();

    info!(
        loop_count = state.research_loop_count,
        is_sufficient = verdict.is_sufficient,
        knowledge_gap = %verdict.knowledge_gap,
        follow_ups = verdict.follow_up_queries.len(),
        "reflection completed"
    );

    Ok(verdict)
}

/// Finalize once the evidence is sufficient or the loop budget is spent;
/// otherwise dispatch the follow-up queries as the next batch.
pub fn evaluate_research(state: &ResearchState, config: &ResearchConfig) -> Route {
    let max = max_research_loops(state, config);
    if state.is_sufficient || state.research_loop_count >= max {
        Route::Finalize
    } else {
        Route::ContinueResearch(dispatch_follow_up(
            state.number_of_ran_queries,
            &state.follow_up_queries,
        ))
    }
}
