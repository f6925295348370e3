use chrono::Local;

/// Date stamp injected into every prompt, e.g. "October 16, 2026".
pub fn current_date() -> String {
    Local::now().format("%B %-d, %Y").to_string()
}

pub fn query_writer(current_date: &str, research_topic: &str, number_queries: usize) -> String {
    format!(
        r#"Your goal is to generate sophisticated and diverse web search queries. These queries are intended for an advanced automated web research tool capable of analyzing complex results, following links, and synthesizing information.

Instructions:
- Always prefer a single search query, only add another query if the original question requests multiple aspects or elements and one query is not enough.
- Each query should focus on one specific aspect of the original question.
- Don't produce more than {number_queries} queries.
- Queries should be diverse, if the topic is broad, generate more than 1 query.
- Don't generate multiple similar queries, 1 is enough.
- Query should ensure that the most current information is gathered. The current date is {current_date}.

Format:
- Format your response as a JSON object with these exact keys:
   - "rationale": Brief explanation of why these queries are relevant
   - "query": A list of search queries

Example:

Topic: What revenue grew more last year apple stock or the number of people buying an iphone
```json
{{
    "rationale": "To answer this comparative growth question accurately, we need specific data points on Apple's stock performance and iPhone sales metrics. These queries target the precise financial information needed.",
    "query": ["Apple total revenue growth fiscal year 2024", "iPhone unit sales growth fiscal year 2024", "Apple stock price growth fiscal year 2024"]
}}
```

Context: {research_topic}

Important: every query must stay within 400 characters. Keep queries concise and focused on the key information."#
    )
}

pub fn reflection(current_date: &str, research_topic: &str, summaries: &str) -> String {
    format!(
        r#"You are an expert research assistant analyzing summaries about "{research_topic}".

Instructions:
- Identify knowledge gaps or areas that need deeper exploration and generate a follow-up query (1 or multiple).
- If provided summaries are sufficient to answer the user's question, don't generate a follow-up query.
- If there is a knowledge gap, generate a follow-up query that would help expand your understanding.
- Focus on technical details, implementation specifics, or emerging trends that weren't fully covered.
- The current date is {current_date}.

Requirements:
- Ensure the follow-up query is self-contained and includes necessary context for web search.

Output Format:
- Format your response as a JSON object with these exact keys:
   - "is_sufficient": true or false
   - "knowledge_gap": Describe what information is missing or needs clarification
   - "follow_up_queries": Write a specific question to address this gap

Example:
```json
{{
    "is_sufficient": true, // or false
    "knowledge_gap": "The summary lacks information about performance metrics and benchmarks", // "" if is_sufficient is true
    "follow_up_queries": ["What are typical performance benchmarks and metrics used to evaluate [specific technology]?"] // [] if is_sufficient is true
}}
```

Reflect carefully on the Summaries to identify knowledge gaps and produce a follow-up query. Then, produce your output following this JSON format:

Summaries:
{summaries}"#
    )
}

pub fn answer(current_date: &str, research_topic: &str, summaries: &str) -> String {
    format!(
        r#"Generate a high-quality answer to the user's question based on the provided summaries.

Instructions:
- The current date is {current_date}.
- You are the final step of a multi-step research process, don't mention that you are the final step.
- You have access to all the information gathered from the previous steps.
- You have access to the user's question.
- Generate a high-quality answer to the user's question based on the provided summaries and the user's question.
- Cite the sources you use by their full URL, exactly as it appears in the summaries.

User Context:
- {research_topic}

Summaries:
{summaries}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_writer_carries_length_reminder_and_count() {
        let prompt = query_writer("January 1, 2026", "Rust async", 3);
        assert!(prompt.contains("Don't produce more than 3 queries"));
        assert!(prompt.contains("400 characters"));
        assert!(prompt.contains("Context: Rust async"));
    }

    #[test]
    fn reflection_embeds_summaries() {
        let prompt = reflection("January 1, 2026", "topic", "first\n\n---\n\nsecond");
        assert!(prompt.ends_with("first\n\n---\n\nsecond"));
        assert!(prompt.contains("\"topic\""));
    }
}
