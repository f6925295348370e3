//! Initial query generation and the query length policy.

use serde::Deserialize;
use tracing::{debug, info};

use crate::ResearchError;
use crate::config::ResearchConfig;
use crate::llm::{CREATIVE_TEMPERATURE, CompletionRequest, LanguageModel, RetryPolicy};
use crate::prompts;
use crate::state::{QueryGenerationState, QueryItem, ResearchState};

/// Upper bound on the length of a single search query, in characters.
pub const MAX_QUERY_CHARS: usize = 400;

/// Structured reply of the query writer.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchQueryList {
    pub query: Vec<String>,
    #[serde(default)]
    pub rationale: String,
}

/// Shorten `query` to its longest prefix of whole words that fits in
/// [`MAX_QUERY_CHARS`]. Queries already within the limit are returned as-is.
///
/// Returns an empty string when the first word alone exceeds the limit.
pub fn truncate_query(query: &str) -> &str {
    if query.chars().count() <= MAX_QUERY_CHARS {
        return query;
    }

    let mut end = 0;
    for (_, word_end) in word_spans(query) {
        if query[..word_end].chars().count() > MAX_QUERY_CHARS {
            break;
        }
        end = word_end;
    }
    &query[..end]
}

/// Byte ranges of the whitespace-delimited words in `text`.
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut current: Option<usize> = None;
    for (idx, ch) in text.char_indices() {
        match (ch.is_whitespace(), current) {
            (true, Some(start)) => {
                spans.push((start, idx));
                current = None;
            }
            (false, None) => current = Some(idx),
            _ => {}
        }
    }
    if let Some(start) = current {
        spans.push((start, text.len()));
    }
    spans
}

/// Produce the first batch of search queries for the run's topic.
///
/// Records `initial_search_query_count` on the state when it is not already
/// set. The batch never exceeds the requested count. Each query is
/// truncated, then trimmed of surrounding whitespace, and queries left blank
/// are dropped.
pub async fn generate_query(
    state: &mut ResearchState,
    config: &ResearchConfig,
    model: &dyn LanguageModel,
    retry: &RetryPolicy,
) -> Result<QueryGenerationState, ResearchError> {
    let requested = *state
        .initial_search_query_count
        .get_or_insert(config.number_of_initial_queries);
    let topic = state.research_topic()?;

    let prompt = prompts::query_writer(&prompts::current_date(), &topic, requested);
    let request =
        CompletionRequest::structured(&config.query_generator_model, prompt, CREATIVE_TEMPERATURE);
    let reply: SearchQueryList = crate::llm::generate_structured(model, &request, retry).await?;

    let query_list: Vec<QueryItem> = reply
        .query
        .iter()
        .take(requested)
        .filter_map(|raw| {
            let query = truncate_query(raw).trim();
            if query.len() < raw.trim().len() {
                debug!(original_len = raw.chars().count(), truncated_len = query.chars().count(), "query shortened");
            }
            (!query.is_empty()).then(|| QueryItem {
                query: query.to_string(),
                rationale: reply.rationale.clone(),
            })
        })
        .collect();

    info!(
        requested,
        generated = query_list.len(),
        rationale = %reply.rationale,
        "generated initial search queries"
    );

    Ok(QueryGenerationState {
        query_list,
        rationale: reply.rationale,
    })
}
