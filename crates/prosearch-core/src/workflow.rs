use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use graph_flow::{
    ExecutionStatus, FlowRunner, GraphBuilder, InMemorySessionStorage, Session, SessionStorage,
    Task,
};
use tracing::{info, warn};

use crate::ResearchError;
use crate::citations::unique_sources;
use crate::config::{Config, ResearchConfig};
use crate::llm::{LanguageModel, OpenRouterModel, RetryPolicy};
use crate::logging::{RunLogInput, log_run_completion};
use crate::metrics;
use crate::search::{SearchProvider, TavilyClient};
use crate::security::Credentials;
use crate::state::{ResearchState, Source};
use crate::tasks::{
    FinalizeAnswerTask, GenerateQueryTask, ROUTE_FINALIZE_KEY, ReflectionTask, ResearchServices,
    STATE_KEY, TRACE_KEY, WebResearchTask,
};
use crate::trace::{TraceCollector, TraceEvent, TraceSummary, persist_trace};

/// The four tasks of the research loop.
struct WorkflowTasks {
    generate_query: Arc<GenerateQueryTask>,
    web_research: Arc<WebResearchTask>,
    reflection: Arc<ReflectionTask>,
    finalize_answer: Arc<FinalizeAnswerTask>,
}

impl WorkflowTasks {
    fn new(services: &Arc<ResearchServices>) -> Self {
        Self {
            generate_query: Arc::new(GenerateQueryTask::new(services.clone())),
            web_research: Arc::new(WebResearchTask::new(services.clone())),
            reflection: Arc::new(ReflectionTask::new(services.clone())),
            finalize_answer: Arc::new(FinalizeAnswerTask::new(services.clone())),
        }
    }
}

fn build_graph(services: &Arc<ResearchServices>) -> (Arc<graph_flow::Graph>, WorkflowTasks) {
    let tasks = WorkflowTasks::new(services);

    let builder = GraphBuilder::new("prosearch_workflow")
        .add_task(tasks.generate_query.clone())
        .add_task(tasks.web_research.clone())
        .add_task(tasks.reflection.clone())
        .add_task(tasks.finalize_answer.clone())
        .add_edge(tasks.generate_query.id(), tasks.web_research.id())
        .add_edge(tasks.web_research.id(), tasks.reflection.id())
        .add_conditional_edge(
            tasks.reflection.id(),
            |ctx| ctx.get_sync::<bool>(ROUTE_FINALIZE_KEY).unwrap_or(true),
            tasks.finalize_answer.id(),
            tasks.web_research.id(),
        )
        .set_start_task(tasks.generate_query.id());

    (Arc::new(builder.build()), tasks)
}

fn new_run_id() -> String {
    format!("run-{}", uuid::Uuid::new_v4())
}

/// Options for a single research run.
pub struct RunOptions<'a> {
    pub question: &'a str,
    pub run_id: Option<String>,
    pub max_research_loops: Option<u32>,
    pub reasoning_model: Option<String>,
    pub initial_search_query_count: Option<usize>,
    pub trace_dir: Option<PathBuf>,
    pub run_log: bool,
}

impl<'a> RunOptions<'a> {
    pub fn new(question: &'a str) -> Self {
        Self {
            question,
            run_id: None,
            max_research_loops: None,
            reasoning_model: None,
            initial_search_query_count: None,
            trace_dir: None,
            run_log: false,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_max_research_loops(mut self, max: u32) -> Self {
        self.max_research_loops = Some(max);
        self
    }

    pub fn with_reasoning_model(mut self, model: impl Into<String>) -> Self {
        self.reasoning_model = Some(model.into());
        self
    }

    pub fn with_initial_search_query_count(mut self, count: usize) -> Self {
        self.initial_search_query_count = Some(count);
        self
    }

    pub fn with_trace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trace_dir = Some(dir.into());
        self
    }

    pub fn with_run_log(mut self, enabled: bool) -> Self {
        self.run_log = enabled;
        self
    }

    fn initial_state(&self) -> ResearchState {
        ResearchState {
            max_research_loops: self.max_research_loops,
            reasoning_model: self.reasoning_model.clone(),
            initial_search_query_count: self.initial_search_query_count,
            ..ResearchState::new(self.question)
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub answer: String,
    pub sources: Vec<Source>,
    pub state: ResearchState,
    pub trace_events: Vec<TraceEvent>,
    pub trace_summary: TraceSummary,
    pub trace_path: Option<PathBuf>,
}

/// Entry point for running the research loop against injected collaborators.
pub struct ResearchAgent {
    model: Arc<dyn LanguageModel>,
    search: Arc<dyn SearchProvider>,
    config: ResearchConfig,
    retry: RetryPolicy,
}

impl ResearchAgent {
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
        }
    }

    /// Build the OpenRouter and Tavily clients once for the whole process.
    pub fn from_config(config: &Config, credentials: Credentials) -> Result<Self, ResearchError> {
        let model = OpenRouterModel::new(&config.llm, credentials.llm)?;
        let search = TavilyClient::new(&config.search, credentials.search)?;
        Ok(Self::new(
            Arc::new(model),
            Arc::new(search),
            config.research.clone(),
            RetryPolicy::from_config(&config.llm),
        ))
    }

    /// Run the loop to completion: either a finalized answer or the error
    /// that aborted the run.
    pub async fn run(&self, options: RunOptions<'_>) -> Result<RunOutcome, ResearchError> {
        let started = Instant::now();
        let result = self.execute(&options).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(outcome) => {
                metrics::record_run(
                    "completed",
                    Some(outcome.state.research_loop_count),
                    duration_ms,
                );
                info!(
                    run_id = %outcome.run_id,
                    loops = outcome.state.research_loop_count,
                    sources = outcome.sources.len(),
                    duration_ms,
                    "research run completed"
                );
            }
            Err(err) => {
                metrics::record_run("failed", None, duration_ms);
                warn!(error = %err, duration_ms, "research run aborted");
            }
        }

        result
    }

    async fn execute(&self, options: &RunOptions<'_>) -> Result<RunOutcome, ResearchError> {
        let services = Arc::new(ResearchServices::new(
            self.model.clone(),
            self.search.clone(),
            self.config.clone(),
            self.retry.clone(),
        ));
        let (graph, tasks) = build_graph(&services);

        let storage = Arc::new(InMemorySessionStorage::new());
        let runner = FlowRunner::new(graph, storage.clone());

        let run_id = options.run_id.clone().unwrap_or_else(new_run_id);
        let session = Session::new_from_task(run_id.clone(), tasks.generate_query.id());
        session.context.set(STATE_KEY, options.initial_state()).await;

        storage
            .save(session)
            .await
            .map_err(|err| anyhow!("failed to persist session: {err}"))?;

        info!(%run_id, question = %options.question, "starting research run");

        loop {
            let result = match runner.run(&run_id).await {
                Ok(result) => result,
                Err(err) => {
                    return Err(services
                        .take_failure()
                        .await
                        .unwrap_or_else(|| anyhow!("graph execution failure: {err}").into()));
                }
            };

            match result.status {
                ExecutionStatus::Completed => break,
                ExecutionStatus::WaitingForInput => continue,
                ExecutionStatus::Error(message) => {
                    return Err(services
                        .take_failure()
                        .await
                        .unwrap_or_else(|| anyhow!(message).into()));
                }
            }
        }

        let session = storage
            .get(&run_id)
            .await
            .map_err(|err| anyhow!("failed to reload session: {err}"))?
            .ok_or_else(|| anyhow!("session missing after execution"))?;

        let state: ResearchState = session
            .context
            .get(STATE_KEY)
            .await
            .ok_or_else(|| ResearchError::InvalidState("research state missing after run".into()))?;
        let answer = state
            .final_answer()
            .ok_or_else(|| ResearchError::InvalidState("run finished without an answer".into()))?
            .to_string();
        let trace: TraceCollector = session.context.get(TRACE_KEY).await.unwrap_or_default();
        let trace_summary = trace.summary();
        let trace_events = trace.into_events();

        // The answer is already final; a failed trace write only loses the trace.
        let trace_path = options
            .trace_dir
            .as_ref()
            .and_then(|dir| match persist_trace(dir, &run_id, &trace_events) {
                Ok(path) => Some(path),
                Err(err) => {
                    warn!(error = %err, %run_id, "failed to persist run trace");
                    None
                }
            });

        let sources = unique_sources(&state.sources_gathered);

        if options.run_log {
            let input = RunLogInput {
                run_id: run_id.clone(),
                question: options.question.to_string(),
                answer: answer.clone(),
                sources: sources.iter().map(|source| source.value.clone()).collect(),
                research_loops: state.research_loop_count,
                trace_path: trace_path.as_ref().map(|path| path.display().to_string()),
            };
            if let Err(err) = log_run_completion(input) {
                warn!(error = %err, %run_id, "failed to append run log");
            }
        }

        Ok(RunOutcome {
            run_id,
            answer,
            sources,
            state,
            trace_events,
            trace_summary,
            trace_path,
        })
    }
}
