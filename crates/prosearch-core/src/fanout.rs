//! Fan-out of query batches into independent search tasks and the join
//! barrier that collects them.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::ResearchError;
use crate::search::SearchProvider;
use crate::state::{QueryGenerationState, WebSearchOutcome, WebSearchState};
use crate::web_research::web_research;

/// Initial batch: ids are positions within the batch, starting at 0.
pub fn dispatch_initial(generated: &QueryGenerationState) -> Vec<WebSearchState> {
    generated
        .query_list
        .iter()
        .enumerate()
        .map(|(idx, item)| WebSearchState {
            search_query: item.query.clone(),
            id: idx,
        })
        .collect()
}

/// Follow-up batch: ids are offset by the number of queries already run.
///
/// Ids are unique within the batch only; a later batch may reuse ids from an
/// earlier one.
pub fn dispatch_follow_up(
    number_of_ran_queries: usize,
    follow_up_queries: &[String],
) -> Vec<WebSearchState> {
    follow_up_queries
        .iter()
        .enumerate()
        .map(|(idx, query)| WebSearchState {
            search_query: query.clone(),
            id: number_of_ran_queries + idx,
        })
        .collect()
}

/// Run every request concurrently and wait for all of them.
///
/// Outcomes are returned in completion order. The first failure aborts the
/// remaining tasks and is returned as the batch error.
pub async fn run_batch(
    provider: Arc<dyn SearchProvider>,
    batch: Vec<WebSearchState>,
) -> Result<Vec<WebSearchOutcome>, ResearchError> {
    let batch_size = batch.len();
    let mut set = JoinSet::new();

    for request in batch {
        let provider = provider.clone();
        set.spawn(async move {
            let id = request.id;
            web_research(provider.as_ref(), &request)
                .await
                .map(|outcome| (id, outcome))
        });
    }

    let mut outcomes = Vec::with_capacity(batch_size);
    while let Some(joined) = set.join_next().await {
        let (id, outcome) = joined.map_err(|err| {
            ResearchError::Other(anyhow::anyhow!("search task panicked or was cancelled: {err}"))
        })??;
        debug!(task_id = id, results = outcome.web_research_result.len(), "search task joined");
        outcomes.push(outcome);
    }

    info!(batch_size, "search batch completed");
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::QueryItem;

    #[test]
    fn initial_ids_are_positional() {
        let generated = QueryGenerationState {
            query_list: ["a", "b", "c"]
                .iter()
                .map(|q| QueryItem {
                    query: q.to_string(),
                    rationale: "r".to_string(),
                })
                .collect(),
            rationale: "r".to_string(),
        };

        let ids: Vec<_> = dispatch_initial(&generated).iter().map(|t| t.id).collect();
        assert_eq!(ids, [0, 1, 2]);
    }

    #[test]
    fn follow_up_ids_are_offset_by_ran_queries() {
        let batch = dispatch_follow_up(5, &["x".to_string(), "y".to_string()]);
        let ids: Vec<_> = batch.iter().map(|t| t.id).collect();
        assert_eq!(ids, [5, 6]);
        assert_eq!(batch[1].search_query, "y");
    }

    #[test]
    fn empty_follow_up_yields_empty_batch() {
        assert!(dispatch_follow_up(3, &[]).is_empty());
    }
}
