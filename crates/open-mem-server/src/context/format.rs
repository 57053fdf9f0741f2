// crates/open-mem-server/src/context/format.rs
// Output formatters: markdown for system-prompt injection, plain text for
// session compaction

use std::collections::BTreeMap;

use open_mem_types::Observation;

use super::builder::ProgressiveContext;
use crate::utils::truncate;

/// Rendering switches derived from settings.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// Show per-entry token costs in the index table.
    pub show_token_costs: bool,
    /// Append the Economics footer.
    pub show_economics: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            show_token_costs: true,
            show_economics: true,
        }
    }
}

/// Render the markdown block injected into the system prompt.
///
/// Layout: header, session table, per-file grouped index, full-detail
/// cards, Economics footer. Observation ids are included so the agent can
/// expand entries on demand through the mem-get tool.
pub fn format_markdown(context: &ProgressiveContext, options: &FormatOptions) -> String {
    if context.is_empty() {
        return String::new();
    }

    let mut out = String::from("## Project Memory (Progressive Disclosure)\n\n");
    out.push_str(
        "Compact recall of past sessions. Use `mem-get` with an id for full detail, \
         `mem-find` to search.\n\n",
    );

    if !context.recent_summaries.is_empty() {
        out.push_str("### Recent Sessions\n\n");
        out.push_str("| When | Summary | Next steps |\n|---|---|---|\n");
        for summary in &context.recent_summaries {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                date_of(&summary.created_at),
                escape_cell(&truncate(&summary.summary, 160)),
                escape_cell(summary.next_steps.as_deref().unwrap_or("-")),
            ));
        }
        out.push('\n');
    }

    if !context.observation_index.is_empty() {
        out.push_str("### Observation Index\n\n");
        for (group, entries) in group_by_file(&context.observation_index) {
            out.push_str(&format!("**{group}**\n\n"));
            if options.show_token_costs {
                out.push_str("| id | type | title | tokens |\n|---|---|---|---|\n");
            } else {
                out.push_str("| id | type | title |\n|---|---|---|\n");
            }
            for obs in entries {
                let row = if options.show_token_costs {
                    format!(
                        "| {} | {} | {} | {} |\n",
                        short_id(&obs.id),
                        obs.kind,
                        escape_cell(&truncate(&obs.title, 90)),
                        obs.token_count,
                    )
                } else {
                    format!(
                        "| {} | {} | {} |\n",
                        short_id(&obs.id),
                        obs.kind,
                        escape_cell(&truncate(&obs.title, 90)),
                    )
                };
                out.push_str(&row);
            }
            out.push('\n');
        }
    }

    if !context.full_observations.is_empty() {
        out.push_str("### Details\n\n");
        for obs in &context.full_observations {
            out.push_str(&format_card(obs));
        }
    }

    if options.show_economics
        && let Some(footer) = economics_footer(context)
    {
        out.push_str(&footer);
    }

    out
}

/// Render the plain-text form used during session compaction:
/// one icon + title bullet per observation.
pub fn format_plain(context: &ProgressiveContext) -> String {
    if context.is_empty() {
        return String::new();
    }
    let mut out = String::from("Memory highlights:\n");
    for summary in &context.recent_summaries {
        out.push_str(&format!("• 📋 {}\n", truncate(&summary.summary, 120)));
    }
    for obs in context
        .observation_index
        .iter()
        .chain(context.full_observations.iter())
    {
        out.push_str(&format!("• {} {}\n", obs.kind.icon(), truncate(&obs.title, 120)));
    }
    out
}

/// One full-detail card.
fn format_card(obs: &Observation) -> String {
    let mut card = format!("#### [{}] {} `{}`\n\n", obs.kind, obs.title, short_id(&obs.id));
    if !obs.subtitle.is_empty() {
        card.push_str(&format!("*{}*\n\n", obs.subtitle));
    }
    card.push_str(&obs.narrative);
    card.push('\n');
    if !obs.facts.is_empty() {
        for fact in &obs.facts {
            card.push_str(&format!("- {fact}\n"));
        }
    }
    if !obs.files_modified.is_empty() {
        card.push_str(&format!("\nModified: {}\n", obs.files_modified.join(", ")));
    }
    card.push('\n');
    card
}

/// Savings footer. Rows with `discovery_tokens == 0` carry no size
/// information for the original output and are excluded from the
/// aggregate rather than guessed at.
fn economics_footer(context: &ProgressiveContext) -> Option<String> {
    let all: Vec<&Observation> = context
        .observation_index
        .iter()
        .chain(context.full_observations.iter())
        .filter(|o| o.discovery_tokens > 0)
        .collect();
    if all.is_empty() {
        return None;
    }
    let raw: i64 = all.iter().map(|o| o.discovery_tokens).sum();
    let compressed: i64 = all.iter().map(|o| o.token_count).sum();
    if raw == 0 {
        return None;
    }
    let saved_pct = ((raw - compressed) as f64 / raw as f64 * 100.0).max(0.0);
    Some(format!(
        "---\n*Economics: {} observations, {} → {} tokens ({:.0}% saved)*\n",
        all.len(),
        raw,
        compressed,
        saved_pct
    ))
}

/// Index entries grouped by their first modified file ("(no files)" when
/// none), stable alphabetical group order.
fn group_by_file(observations: &[Observation]) -> BTreeMap<String, Vec<&Observation>> {
    let mut groups: BTreeMap<String, Vec<&Observation>> = BTreeMap::new();
    for obs in observations {
        let group = obs
            .files_modified
            .first()
            .cloned()
            .unwrap_or_else(|| "(no files)".to_string());
        groups.entry(group).or_default().push(obs);
    }
    groups
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(8)]
}

fn date_of(timestamp: &str) -> &str {
    &timestamp[..timestamp.len().min(10)]
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use open_mem_types::{ObservationType, SessionSummary};

    fn obs(id: &str, title: &str, file: Option<&str>) -> Observation {
        Observation {
            id: id.into(),
            session_id: "s1".into(),
            kind: ObservationType::Bugfix,
            title: title.into(),
            subtitle: String::new(),
            facts: vec!["a fact".into()],
            narrative: "what happened".into(),
            concepts: vec![],
            files_read: vec![],
            files_modified: file.map(|f| vec![f.to_string()]).unwrap_or_default(),
            raw_tool_output: String::new(),
            tool_name: "Edit".into(),
            created_at: "2026-01-15T10:00:00Z".into(),
            token_count: 20,
            discovery_tokens: 400,
            importance: 4,
            superseded_by: None,
            superseded_at: None,
            deleted_at: None,
        }
    }

    fn context() -> ProgressiveContext {
        ProgressiveContext {
            recent_summaries: vec![SessionSummary {
                id: "sum".into(),
                session_id: "s0".into(),
                summary: "refactored the queue".into(),
                key_decisions: vec![],
                files_modified: vec![],
                concepts: vec![],
                created_at: "2026-01-14T09:00:00Z".into(),
                token_count: 30,
                request: None,
                investigated: None,
                learned: None,
                completed: None,
                next_steps: Some("wire the daemon".into()),
            }],
            observation_index: vec![
                obs("11111111-aaaa", "Fixed claim race", Some("src/db/pending.rs")),
                obs("22222222-bbbb", "Tuned backoff", Some("src/db/pending.rs")),
            ],
            full_observations: vec![obs("33333333-cccc", "Discovered WAL quirk", None)],
            total_tokens: 90,
        }
    }

    #[test]
    fn markdown_has_all_sections() {
        let md = format_markdown(&context(), &FormatOptions::default());
        assert!(md.contains("Progressive Disclosure"));
        assert!(md.contains("### Recent Sessions"));
        assert!(md.contains("wire the daemon"));
        assert!(md.contains("### Observation Index"));
        assert!(md.contains("src/db/pending.rs"));
        assert!(md.contains("### Details"));
        assert!(md.contains("Discovered WAL quirk"));
        assert!(md.contains("Economics"));
        // Short ids only
        assert!(md.contains("11111111"));
        assert!(!md.contains("11111111-aaaa"));
    }

    #[test]
    fn economics_excludes_unknown_discovery_tokens() {
        let mut ctx = context();
        for obs in ctx
            .observation_index
            .iter_mut()
            .chain(ctx.full_observations.iter_mut())
        {
            obs.discovery_tokens = 0;
        }
        let md = format_markdown(&ctx, &FormatOptions::default());
        assert!(!md.contains("Economics"));
    }

    #[test]
    fn token_costs_column_is_optional() {
        let options = FormatOptions {
            show_token_costs: false,
            show_economics: true,
        };
        let md = format_markdown(&context(), &options);
        assert!(!md.contains("| tokens |"));
    }

    #[test]
    fn plain_text_is_icon_bullets() {
        let plain = format_plain(&context());
        assert!(plain.contains("• 🐛 Fixed claim race"));
        assert!(plain.contains("• 📋 refactored the queue"));
        assert!(!plain.contains('|'), "no tables in compaction form");
    }

    #[test]
    fn empty_context_renders_nothing() {
        assert_eq!(format_markdown(&ProgressiveContext::default(), &FormatOptions::default()), "");
        assert_eq!(format_plain(&ProgressiveContext::default()), "");
    }
}
