use std::sync::Arc;

use async_trait::async_trait;
use graph_flow::{Context, GraphError, NextAction, Task, TaskResult};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::ResearchError;
use crate::config::ResearchConfig;
use crate::fanout::{dispatch_initial, run_batch};
use crate::finalize::finalize_answer;
use crate::llm::{LanguageModel, RetryPolicy};
use crate::metrics;
use crate::query::generate_query;
use crate::reflection::{Route, evaluate_research, reflect};
use crate::search::SearchProvider;
use crate::state::{ResearchState, WebSearchState};
use crate::trace::TraceCollector;

pub(crate) const STATE_KEY: &str = "research.state";
pub(crate) const PENDING_KEY: &str = "research.pending";
pub(crate) const ROUTE_FINALIZE_KEY: &str = "route.finalize";
pub(crate) const TRACE_KEY: &str = "run.trace";

/// Collaborators and settings shared by every task of one run.
pub struct ResearchServices {
    pub model: Arc<dyn LanguageModel>,
    pub search: Arc<dyn SearchProvider>,
    pub config: ResearchConfig,
    pub retry: RetryPolicy,
    failure: Mutex<Option<ResearchError>>,
}

impl ResearchServices {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        search: Arc<dyn SearchProvider>,
        config: ResearchConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            model,
            search,
            config,
            retry,
            failure: Mutex::new(None),
        }
    }

    /// Keep the typed error for the caller and hand graph_flow a string form.
    async fn fail(&self, err: ResearchError) -> GraphError {
        let message = err.to_string();
        *self.failure.lock().await = Some(err);
        GraphError::TaskExecutionFailed(message)
    }

    /// The error that aborted the run, if a task recorded one.
    pub(crate) async fn take_failure(&self) -> Option<ResearchError> {
        self.failure.lock().await.take()
    }
}

async fn load_state(services: &ResearchServices, context: &Context) -> graph_flow::Result<ResearchState> {
    match context.get::<ResearchState>(STATE_KEY).await {
        Some(state) => Ok(state),
        None => Err(services
            .fail(ResearchError::InvalidState(
                "research state missing from session context".into(),
            ))
            .await),
    }
}

async fn record_trace(context: &Context, step: &str, message: String) {
    let mut trace: TraceCollector = context.get(TRACE_KEY).await.unwrap_or_default();
    trace.record(step, message);
    context.set(TRACE_KEY, &trace).await;
}

pub struct GenerateQueryTask {
    services: Arc<ResearchServices>,
}

impl GenerateQueryTask {
    pub fn new(services: Arc<ResearchServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Task for GenerateQueryTask {
    fn id(&self) -> &str {
        "generate_query"
    }

    #[instrument(name = "task.generate_query", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let services = &self.services;
        let mut state = load_state(services, &context).await?;

        let generated = match generate_query(
            &mut state,
            &services.config,
            services.model.as_ref(),
            &services.retry,
        )
        .await
        {
            Ok(generated) => generated,
            Err(err) => return Err(services.fail(err).await),
        };

        let batch = dispatch_initial(&generated);
        let queries: Vec<&str> = batch.iter().map(|task| task.search_query.as_str()).collect();
        debug!(queries = ?queries, "initial batch dispatched");
        record_trace(&context, self.id(), format!("{} queries: {}", batch.len(), queries.join(" | "))).await;

        context.set(STATE_KEY, &state).await;
        context.set(PENDING_KEY, &batch).await;

        Ok(TaskResult::new(
            Some(format!("Generated {} search queries", batch.len())),
            NextAction::ContinueAndExecute,
        ))
    }
}

pub struct WebResearchTask {
    services: Arc<ResearchServices>,
}

impl WebResearchTask {
    pub fn new(services: Arc<ResearchServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Task for WebResearchTask {
    fn id(&self) -> &str {
        "web_research"
    }

    #[instrument(name = "task.web_research", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let services = &self.services;
        let mut state = load_state(services, &context).await?;
        let batch: Vec<WebSearchState> = context.get(PENDING_KEY).await.unwrap_or_default();
        let ids: Vec<usize> = batch.iter().map(|task| task.id).collect();
        let batch_size = batch.len();

        let outcomes = match run_batch(services.search.clone(), batch).await {
            Ok(outcomes) => outcomes,
            Err(err) => return Err(services.fail(err).await),
        };

        let mut results = 0;
        for outcome in outcomes {
            results += outcome.web_research_result.len();
            state.merge_search(outcome);
        }
        metrics::record_search_batch(batch_size);

        info!(
            batch_size,
            results,
            total_results = state.web_research_result.len(),
            "search batch merged"
        );
        record_trace(&context, self.id(), format!("tasks {ids:?} returned {results} results")).await;

        context.set(STATE_KEY, &state).await;
        context.set(PENDING_KEY, Vec::<WebSearchState>::new()).await;

        Ok(TaskResult::new(
            Some(format!("Completed {batch_size} searches with {results} results")),
            NextAction::ContinueAndExecute,
        ))
    }
}

pub struct ReflectionTask {
    services: Arc<ResearchServices>,
}

impl ReflectionTask {
    pub fn new(services: Arc<ResearchServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Task for ReflectionTask {
    fn id(&self) -> &str {
        "reflection"
    }

    #[instrument(name = "task.reflection", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let services = &self.services;
        let mut state = load_state(services, &context).await?;

        if let Err(err) = reflect(
            &mut state,
            &services.config,
            services.model.as_ref(),
            &services.retry,
        )
        .await
        {
            return Err(services.fail(err).await);
        }

        let route = evaluate_research(&state, &services.config);
        let verdict = match &route {
            Route::Finalize => "finalize".to_string(),
            Route::ContinueResearch(batch) => format!("continue with {} follow-ups", batch.len()),
        };
        record_trace(
            &context,
            self.id(),
            format!(
                "loop {}: sufficient={}, {verdict}",
                state.research_loop_count, state.is_sufficient
            ),
        )
        .await;

        context.set_sync(ROUTE_FINALIZE_KEY, route.is_finalize());
        if let Route::ContinueResearch(batch) = route {
            context.set(PENDING_KEY, &batch).await;
        }
        context.set(STATE_KEY, &state).await;

        Ok(TaskResult::new(
            Some(format!("Reflection {} routed to {verdict}", state.research_loop_count)),
            NextAction::ContinueAndExecute,
        ))
    }
}

pub struct FinalizeAnswerTask {
    services: Arc<ResearchServices>,
}

impl FinalizeAnswerTask {
    pub fn new(services: Arc<ResearchServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Task for FinalizeAnswerTask {
    fn id(&self) -> &str {
        "finalize_answer"
    }

    #[instrument(name = "task.finalize_answer", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let services = &self.services;
        let mut state = load_state(services, &context).await?;

        let unique_sources = match finalize_answer(
            &mut state,
            &services.config,
            services.model.as_ref(),
            &services.retry,
        )
        .await
        {
            Ok(sources) => sources,
            Err(err) => return Err(services.fail(err).await),
        };

        record_trace(
            &context,
            self.id(),
            format!("answer with {} unique sources", unique_sources.len()),
        )
        .await;
        context.set(STATE_KEY, &state).await;

        Ok(TaskResult::new(
            state.final_answer().map(str::to_string),
            NextAction::End,
        ))
    }
}
