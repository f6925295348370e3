use tracing::info;

use crate::ResearchError;
use crate::citations::stitch_citations;
use crate::config::ResearchConfig;
use crate::llm::{CompletionRequest, DETERMINISTIC_TEMPERATURE, LanguageModel, RetryPolicy};
use crate::prompts;
use crate::reflection::reasoning_model;
use crate::state::{Message, ResearchState, Source};

/// Separator placed between result blocks in the answer prompt.
pub const ANSWER_SEPARATOR: &str = "\n---\n\n";

/// Synthesize the answer, splice citation handles into it, and append it to
/// the conversation as the run's final assistant message.
///
/// Returns the deduplicated sources referenced by the answer.
pub async fn finalize_answer(
    state: &mut ResearchState,
    config: &ResearchConfig,
    model: &dyn LanguageModel,
    retry: &RetryPolicy,
) -> Result<Vec<Source>, ResearchError> {
    let topic = state.research_topic()?;
    let summaries = state.web_research_result.join(ANSWER_SEPARATOR);
    let prompt = prompts::answer(&prompts::current_date(), &topic, &summaries);
    let request = CompletionRequest::text(
        reasoning_model(state, config),
        prompt,
        DETERMINISTIC_TEMPERATURE,
    );

    let answer = crate::llm::generate_text(model, &request, retry).await?;
    let (final_answer, unique_sources) = stitch_citations(&answer, &state.sources_gathered);

    info!(
        answer_len = answer.len(),
        unique_sources = unique_sources.len(),
        "final answer synthesized"
    );

    state.messages.push(Message::assistant(final_answer));
    Ok(unique_sources)
}
