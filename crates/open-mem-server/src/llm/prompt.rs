// crates/open-mem-server/src/llm/prompt.rs
// Prompt construction for compression, summarization, and reranking

use super::provider::{ModeHints, RerankCandidate};
use crate::utils::truncate;

/// Static shared prefix for all compression prompts.
/// Stays identical across calls to maximize provider KV cache reuse.
const COMPRESSION_PREFIX: &str = r#"You distill raw coding-tool output into one compact observation.
Respond with a single JSON object and nothing else:
{
  "type": "<decision|bugfix|feature|refactor|discovery|change>",
  "title": "<one line, what happened>",
  "subtitle": "<optional qualifier>",
  "facts": ["<standalone facts worth recalling>"],
  "narrative": "<2-4 sentences of context a future session needs>",
  "concepts": ["<tags>"],
  "filesRead": ["<paths>"],
  "filesModified": ["<paths>"],
  "importance": <1-5>
}
Keep titles specific. Omit boilerplate. Never invent file paths."#;

const SUMMARY_PREFIX: &str = r#"You summarize a coding session from its observations.
Respond with a single JSON object and nothing else:
{
  "summary": "<3-5 sentences covering the arc of the session>",
  "keyDecisions": ["<decisions made>"],
  "filesModified": ["<paths>"],
  "concepts": ["<tags>"],
  "request": "<what the user originally asked>",
  "investigated": "<what was explored>",
  "learned": "<what was discovered>",
  "completed": "<what was finished>",
  "nextSteps": "<what remains>"
}
Leave a field empty when the observations do not support it."#;

const RERANK_PREFIX: &str = r#"You rank memory search results by relevance to a query.
Respond with a single JSON array of candidate indices, most relevant first,
e.g. [2, 0, 3, 1]. Include every index exactly once. No other text."#;

/// Max raw-output characters embedded in a compression prompt.
const MAX_OUTPUT_CHARS: usize = 24_000;

/// Build the compression prompt for one captured tool output.
pub fn compression_prompt(tool_name: &str, output: &str, hints: &ModeHints) -> String {
    let mut prompt = String::from(COMPRESSION_PREFIX);

    if !hints.observation_types.is_empty() {
        prompt.push_str("\nAllowed types for this project: ");
        prompt.push_str(&hints.observation_types.join(", "));
        prompt.push('.');
    }
    if !hints.concept_vocabulary.is_empty() {
        prompt.push_str("\nPrefer concepts from: ");
        prompt.push_str(&hints.concept_vocabulary.join(", "));
        prompt.push('.');
    }

    prompt.push_str("\n\nTool: ");
    prompt.push_str(tool_name);
    prompt.push_str("\nOutput:\n");
    prompt.push_str(&truncate(output, MAX_OUTPUT_CHARS));
    prompt
}

/// Build the summarization prompt over observation digests.
pub fn summary_prompt(observations: &[String]) -> String {
    let mut prompt = String::from(SUMMARY_PREFIX);
    prompt.push_str("\n\nObservations:\n");
    for (i, obs) in observations.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, truncate(obs, 600)));
    }
    prompt
}

/// Build the rerank prompt for a query and its candidates.
pub fn rerank_prompt(query: &str, candidates: &[RerankCandidate]) -> String {
    let mut prompt = String::from(RERANK_PREFIX);
    prompt.push_str("\n\nQuery: ");
    prompt.push_str(query);
    prompt.push_str("\n\nCandidates:\n");
    for (i, candidate) in candidates.iter().enumerate() {
        prompt.push_str(&format!("[{}] {}\n", i, truncate(&candidate.text, 300)));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_prompt_includes_tool_and_output() {
        let prompt = compression_prompt("Read", "file contents here", &ModeHints::default());
        assert!(prompt.contains("Tool: Read"));
        assert!(prompt.contains("file contents here"));
        assert!(prompt.contains("\"narrative\""));
    }

    #[test]
    fn compression_prompt_carries_mode_hints() {
        let hints = ModeHints {
            observation_types: vec!["decision".into(), "bugfix".into()],
            concept_vocabulary: vec!["auth".into()],
        };
        let prompt = compression_prompt("Bash", "x", &hints);
        assert!(prompt.contains("decision, bugfix"));
        assert!(prompt.contains("Prefer concepts from: auth"));
    }

    #[test]
    fn compression_prompt_truncates_huge_output() {
        let huge = "y".repeat(100_000);
        let prompt = compression_prompt("Read", &huge, &ModeHints::default());
        assert!(prompt.len() < 30_000);
    }

    #[test]
    fn rerank_prompt_numbers_candidates() {
        let candidates = vec![
            RerankCandidate { id: "a".into(), text: "first".into() },
            RerankCandidate { id: "b".into(), text: "second".into() },
        ];
        let prompt = rerank_prompt("query", &candidates);
        assert!(prompt.contains("[0] first"));
        assert!(prompt.contains("[1] second"));
    }
}
