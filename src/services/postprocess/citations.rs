//! Citation collection from tool outputs and source-list formatting.
//!
//! Collection walks agent results in order and tool executions in order, so
//! numbering is stable across re-runs with identical inputs. URLs are
//! deduplicated on first sight; the assigned `1..N` numbering is the
//! contract between synthesis and the source list.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use crate::domain::models::{AgentExecutionResult, Citation};

/// Extract citations from every tool-execution output, in stable order.
pub fn collect_citations(results: &[AgentExecutionResult]) -> Vec<Citation> {
    let mut citations = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for result in results {
        for execution in &result.tool_executions {
            if !execution.success {
                continue;
            }
            for candidate in candidates_from_output(&execution.output) {
                if let Some(citation) = parse_citation(candidate) {
                    if seen.insert(citation.url.clone()) {
                        citations.push(citation);
                    }
                }
            }
        }
    }
    citations
}

/// Flatten a tool output into candidate citation objects.
fn candidates_from_output(output: &Value) -> Vec<&Value> {
    match output {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => {
            if map.contains_key("url") {
                vec![output]
            } else if let Some(Value::Array(items)) = map.get("results") {
                items.iter().collect()
            } else if let Some(Value::Array(items)) = map.get("sources") {
                items.iter().collect()
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}

fn parse_citation(value: &Value) -> Option<Citation> {
    let url = value.get("url")?.as_str()?.trim();
    if url.is_empty() {
        return None;
    }
    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let score = |key: &str, fallback: f64| value.get(key).and_then(Value::as_f64).unwrap_or(fallback);

    let mut title = text("title");
    if title.is_empty() {
        title = url.to_string();
    }
    let mut snippet = text("snippet");
    if snippet.is_empty() {
        snippet = text("description");
    }
    let mut source = text("source");
    if source.is_empty() {
        source = source_host(url);
    }

    Some(Citation {
        url: url.to_string(),
        title,
        source,
        snippet,
        published_date: value
            .get("published_date")
            .and_then(Value::as_str)
            .map(str::to_string),
        credibility_score: score("credibility_score", 0.5),
        quality_score: score("quality_score", 0.5),
    })
}

/// Host portion of a URL, without pulling in a URL parser.
fn source_host(url: &str) -> String {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .trim_start_matches("www.")
        .to_string()
}

/// Numbered one-line-per-citation rendering for prompt injection.
pub fn render_citation_list(citations: &[Citation]) -> String {
    citations
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[{}] {} ({})\n", i + 1, c.title, c.url))
        .collect()
}

/// Inject `available_citations`, `citation_count`, and the structured list
/// into a synthesis context.
pub fn inject_citation_context(context: &mut BTreeMap<String, Value>, citations: &[Citation]) {
    if citations.is_empty() {
        return;
    }
    context.insert(
        "available_citations".into(),
        Value::String(render_citation_list(citations)),
    );
    context.insert("citation_count".into(), Value::from(citations.len()));
    context.insert(
        "citations_list".into(),
        serde_json::to_value(citations).unwrap_or(Value::Null),
    );
}

/// Build the Sources section, listing inline-used citations first and the
/// remainder under an additional-sources heading.
pub fn format_sources(citations: &[Citation], used: &[u32]) -> String {
    if citations.is_empty() {
        return String::new();
    }
    let used_set: HashSet<u32> = used.iter().copied().collect();
    let mut out = String::from("\n\n## Sources\n");
    for (i, citation) in citations.iter().enumerate() {
        let number = (i + 1) as u32;
        if used_set.is_empty() || used_set.contains(&number) {
            out.push_str(&format!("[{number}] {} — {}\n", citation.title, citation.url));
        }
    }
    let additional: Vec<(usize, &Citation)> = citations
        .iter()
        .enumerate()
        .filter(|(i, _)| !used_set.is_empty() && !used_set.contains(&((*i + 1) as u32)))
        .collect();
    if !additional.is_empty() {
        out.push_str("\nAdditional sources:\n");
        for (i, citation) in additional {
            out.push_str(&format!("[{}] {} — {}\n", i + 1, citation.title, citation.url));
        }
    }
    out
}
