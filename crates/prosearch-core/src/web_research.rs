use tracing::{debug, instrument};

use crate::ResearchError;
use crate::citations::{derive_label, short_url};
use crate::search::{SearchHit, SearchProvider, SearchRequest};
use crate::state::{Source, WebSearchOutcome, WebSearchState};

/// Readable block for one search hit.
pub fn format_result(hit: &SearchHit) -> String {
    format!("{}\n\n{}\n\nSource: {}", hit.title, hit.content, hit.url)
}

/// Execute one query and normalise its hits into sources and text blocks.
/// Provider errors propagate unchanged.
#[instrument(name = "step.web_research", skip(provider, task), fields(task_id = task.id, query = %task.search_query))]
pub async fn web_research(
    provider: &dyn SearchProvider,
    task: &WebSearchState,
) -> Result<WebSearchOutcome, ResearchError> {
    let hits = provider
        .search(&SearchRequest::advanced(&task.search_query))
        .await?;

    debug!(results = hits.len(), "search returned");

    let mut outcome = WebSearchOutcome {
        search_query: vec![task.search_query.clone()],
        ..WebSearchOutcome::default()
    };

    for (position, hit) in hits.iter().enumerate().map(|(idx, hit)| (idx + 1, hit)) {
        outcome.sources_gathered.push(Source {
            value: hit.url.clone(),
            short_url: short_url(position),
            label: derive_label(&hit.url, position),
        });
        outcome.web_research_result.push(format_result(hit));
    }

    Ok(outcome)
}
