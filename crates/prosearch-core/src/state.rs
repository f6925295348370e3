//! Research state threaded through every step of the loop.
//!
//! `ResearchState` is owned by a single run. Concurrent search tasks never
//! touch it directly; they return a [`WebSearchOutcome`] which the join step
//! appends via [`ResearchState::merge_search`].

use serde::{Deserialize, Serialize};

use crate::ResearchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A gathered source. `value` is the URL and the only dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub value: String,
    pub short_url: String,
    pub label: String,
}

/// One generated query together with the batch rationale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryItem {
    pub query: String,
    pub rationale: String,
}

/// Output of the query generation step; consumed by the initial fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryGenerationState {
    pub query_list: Vec<QueryItem>,
    pub rationale: String,
}

/// Unit of work dispatched to one parallel search task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSearchState {
    pub search_query: String,
    pub id: usize,
}

/// Isolated contribution of one completed search task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSearchOutcome {
    pub search_query: Vec<String>,
    pub web_research_result: Vec<String>,
    pub sources_gathered: Vec<Source>,
}

/// Structured verdict returned by the reasoning model during reflection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reflection {
    pub is_sufficient: bool,
    #[serde(default)]
    pub knowledge_gap: String,
    #[serde(default)]
    pub follow_up_queries: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchState {
    pub messages: Vec<Message>,
    pub search_query: Vec<String>,
    pub web_research_result: Vec<String>,
    pub sources_gathered: Vec<Source>,
    pub initial_search_query_count: Option<usize>,
    pub research_loop_count: u32,
    pub is_sufficient: bool,
    pub knowledge_gap: String,
    pub follow_up_queries: Vec<String>,
    pub number_of_ran_queries: usize,
    pub max_research_loops: Option<u32>,
    pub reasoning_model: Option<String>,
}

impl ResearchState {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(question)],
            ..Self::default()
        }
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

    /// The topic under research, derived from the conversation.
    ///
    /// A single message is used verbatim; longer conversations are rendered
    /// as a `User:`/`Assistant:` transcript.
    pub fn research_topic(&self) -> Result<String, ResearchError> {
        match self.messages.as_slice() {
            [] => Err(ResearchError::InvalidState(
                "conversation has no messages".into(),
            )),
            [only] => Ok(only.content.clone()),
            many => Ok(many
                .iter()
                .map(|message| match message.role {
                    Role::User => format!("User: {}\n", message.content),
                    Role::Assistant => format!("Assistant: {}\n", message.content),
                })
                .collect()),
        }
    }

    /// Append one task's contribution. Pure append, so the result does not
    /// depend on which task of a batch completes first.
    pub fn merge_search(&mut self, outcome: WebSearchOutcome) {
        self.search_query.extend(outcome.search_query);
        self.web_research_result.extend(outcome.web_research_result);
        self.sources_gathered.extend(outcome.sources_gathered);
    }

    /// Content of the final assistant message, if the run has finalized.
    pub fn final_answer(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
            .map(|message| message.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(query: &str, urls: &[&str]) -> WebSearchOutcome {
        WebSearchOutcome {
            search_query: vec![query.to_string()],
            web_research_result: urls.iter().map(|url| format!("block {url}")).collect(),
            sources_gathered: urls
                .iter()
                .enumerate()
                .map(|(idx, url)| Source {
                    value: url.to_string(),
                    short_url: format!("[{}]", idx + 1),
                    label: "example".to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn merge_is_append_only_in_either_order() {
        let a = outcome("a", &["https://a.test/1", "https://a.test/2"]);
        let b = outcome("b", &["https://b.test/1", "https://b.test/2", "https://b.test/3"]);

        let mut forward = ResearchState::new("topic");
        forward.merge_search(a.clone());
        forward.merge_search(b.clone());

        let mut reverse = ResearchState::new("topic");
        reverse.merge_search(b);
        reverse.merge_search(a);

        for state in [&forward, &reverse] {
            assert_eq!(state.sources_gathered.len(), 5);
            assert_eq!(state.web_research_result.len(), 5);
            assert_eq!(state.search_query.len(), 2);
        }

        let mut forward_urls: Vec<_> = forward.sources_gathered.iter().map(|s| &s.value).collect();
        let mut reverse_urls: Vec<_> = reverse.sources_gathered.iter().map(|s| &s.value).collect();
        forward_urls.sort();
        reverse_urls.sort();
        assert_eq!(forward_urls, reverse_urls);
    }

    #[test]
    fn research_topic_uses_single_message_verbatim() {
        let state = ResearchState::new("What is graph_flow?");
        assert_eq!(state.research_topic().unwrap(), "What is graph_flow?");
    }

    #[test]
    fn research_topic_renders_transcript() {
        let mut state = ResearchState::new("first");
        state.messages.push(Message::assistant("reply"));
        state.messages.push(Message::user("second"));

        assert_eq!(
            state.research_topic().unwrap(),
            "User: first\nAssistant: reply\nUser: second\n"
        );
    }

    #[test]
    fn research_topic_requires_messages() {
        let state = ResearchState::default();
        assert!(matches!(
            state.research_topic(),
            Err(ResearchError::InvalidState(_))
        ));
    }

    #[test]
    fn reflection_accepts_missing_optional_fields() {
        let reflection: Reflection = serde_json::from_str(r#"{"is_sufficient": true}"#).unwrap();
        assert!(reflection.is_sufficient);
        assert!(reflection.follow_up_queries.is_empty());
    }
}
