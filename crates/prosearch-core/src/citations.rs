//! Source resolution and citation splicing.

use std::collections::HashSet;
use std::fmt::Write as _;

use url::Url;

use crate::state::Source;

pub const REFERENCES_HEADER: &str = "## Sources";

/// Short display label for a source URL: the first dot-separated segment of
/// the host with any leading `www.` removed. Falls back to `source<position>`
/// (1-indexed) when the URL has no parseable host.
pub fn derive_label(url: &str, position: usize) -> String {
    let host = Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string));

    match host {
        Some(host) => {
            let host = host.strip_prefix("www.").unwrap_or(&host);
            host.split('.').next().unwrap_or_default().to_string()
        }
        None => format!("source{position}"),
    }
}

/// Display handle for the `position`-th result of one search task.
pub fn short_url(position: usize) -> String {
    format!("[{position}]")
}

/// Sources deduplicated by exact `value`, first occurrence wins.
pub fn unique_sources(sources: &[Source]) -> Vec<Source> {
    let mut seen = HashSet::new();
    sources
        .iter()
        .filter(|source| seen.insert(source.value.as_str()))
        .cloned()
        .collect()
}

/// Replace each source URL with its short handle, one sentence pass per
/// source, in order. Later passes operate on the text produced by earlier
/// ones, and a URL is only replaced when it sits inside a single sentence.
pub fn insert_citation_markers(text: &str, sources: &[Source]) -> String {
    let mut formatted = text.to_string();
    for source in sources {
        let sentences = split_sentences(&formatted)
            .into_iter()
            .map(|sentence| {
                if sentence.contains(&source.value) {
                    sentence.replace(&source.value, &source.short_url)
                } else {
                    sentence.to_string()
                }
            })
            .collect::<Vec<_>>();
        formatted = sentences.join(".");
    }
    formatted
}

/// Split on sentence-ending periods: a `.` followed by whitespace or the end
/// of the text. Joining the pieces with `.` restores the input.
///
/// Do not switch this to a plain `split('.')`. Every URL contains a dot, so a
/// literal split cuts each URL apart and no citation marker could ever be
/// inserted.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if ch != '.' {
            continue;
        }
        let ends_sentence = match chars.peek() {
            None => true,
            Some((_, next)) => next.is_whitespace(),
        };
        if ends_sentence {
            pieces.push(&text[start..idx]);
            start = idx + 1;
        }
    }
    pieces.push(&text[start..]);
    pieces
}

/// Reference section listing each unique source as `<short_url>: <value>`.
pub fn render_references(sources: &[Source]) -> String {
    let mut references = format!("\n\n{REFERENCES_HEADER}\n");
    for source in sources {
        let _ = writeln!(references, "{}: {}", source.short_url, source.value);
    }
    references
}

/// Full finalization transform: dedup, splice markers, append references.
pub fn stitch_citations(answer: &str, sources: &[Source]) -> (String, Vec<Source>) {
    let unique = unique_sources(sources);
    let mut stitched = insert_citation_markers(answer, &unique);
    stitched.push_str(&render_references(&unique));
    (stitched, unique)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(value: &str, short: &str) -> Source {
        Source {
            value: value.to_string(),
            short_url: short.to_string(),
            label: derive_label(value, 1),
        }
    }

    #[test]
    fn label_strips_www_and_keeps_first_segment() {
        assert_eq!(derive_label("https://www.nature.com/articles/x", 1), "nature");
        assert_eq!(derive_label("http://docs.rs/tokio", 2), "docs");
        assert_eq!(derive_label("https://example.com:8443/p", 3), "example");
    }

    #[test]
    fn label_falls_back_to_position() {
        assert_eq!(derive_label("not a url", 3), "source3");
        assert_eq!(derive_label("mailto:someone@example.com", 4), "source4");
    }

    #[test]
    fn dedup_keeps_first_occurrence_in_order() {
        let sources = vec![source("a", "[1]"), source("b", "[2]"), source("a", "[3]")];
        let unique = unique_sources(&sources);
        let values: Vec<_> = unique.iter().map(|s| s.value.as_str()).collect();
        assert_eq!(values, ["a", "b"]);
        assert_eq!(unique[0].short_url, "[1]");
    }

    #[test]
    fn dedup_is_case_sensitive() {
        let sources = vec![
            source("https://example.com/A", "[1]"),
            source("https://example.com/a", "[2]"),
        ];
        assert_eq!(unique_sources(&sources).len(), 2);
    }

    #[test]
    fn markers_replace_urls_inside_sentences() {
        let sources = vec![source("http://example.com/p", "[1]")];
        let text = "Rust is fast (http://example.com/p). It is also safe.";
        assert_eq!(
            insert_citation_markers(text, &sources),
            "Rust is fast ([1]). It is also safe."
        );
    }

    #[test]
    fn dotted_urls_survive_sentence_split() {
        let text = "See http://a.example.com/p. Done.";
        let pieces = split_sentences(text);
        assert_eq!(pieces, ["See http://a.example.com/p", " Done", ""]);
        assert_eq!(pieces.join("."), text);
    }

    #[test]
    fn url_at_sentence_end_is_replaced() {
        let sources = vec![source("http://example.com/p", "[1]")];
        let text = "See http://example.com/p. Then continue.";
        assert_eq!(
            insert_citation_markers(text, &sources),
            "See [1]. Then continue."
        );
    }

    #[test]
    fn passes_run_sequentially_per_source() {
        // The second source's URL only exists once the first pass rewrote it.
        let sources = vec![source("https://a.test/x", "https://b.test/y"), source("https://b.test/y", "[2]")];
        let text = "Claim from https://a.test/x.";
        assert_eq!(insert_citation_markers(text, &sources), "Claim from [2].");
    }

    #[test]
    fn text_without_urls_is_untouched() {
        let sources = vec![source("https://a.test/x", "[1]")];
        let text = "Nothing to cite here. Version 1.5 shipped.\n\nDone.";
        assert_eq!(insert_citation_markers(text, &sources), text);
    }

    #[test]
    fn references_list_each_unique_source() {
        let sources = vec![
            source("https://a.test/x", "[1]"),
            source("https://b.test/y", "[2]"),
            source("https://a.test/x", "[3]"),
        ];
        let (stitched, unique) = stitch_citations("Answer.", &sources);
        assert_eq!(unique.len(), 2);
        insta::assert_snapshot!(
            stitched.replace('\n', "|"),
            @"Answer.||## Sources|[1]: https://a.test/x|[2]: https://b.test/y|"
        );
    }
}
