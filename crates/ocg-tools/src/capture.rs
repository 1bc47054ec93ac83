use std::sync::OnceLock;

use regex::Regex;

use ocg_memory::MemoryResult;

fn capture_triggers() -> &'static Vec<Regex> {
    static TRIGGERS: OnceLock<Vec<Regex>> = OnceLock::new();
    TRIGGERS.get_or_init(|| {
        [
            r"(?i)(zapamatuj|pamatuj|remember)",
            r"(?i)(preferuji|radši|prefer)",
            r"(?i)(rozhodli jsme|budeme používat|decided|will use)",
            r"(?i)(můj\s+\w+\s+je|my\s+\w+\s+is|is\s+my)",
            r"(?i)(i\s+(like|prefer|hate|love|want|need))",
            r"(?i)(always|never|important)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static capture pattern"))
        .collect()
    })
}

fn emoji_pattern() -> &'static Regex {
    static EMOJI: OnceLock<Regex> = OnceLock::new();
    EMOJI.get_or_init(|| Regex::new(r"[\u{1F300}-\u{1F9FF}]").expect("static emoji pattern"))
}

/// Whether a user message looks worth writing to long-term memory.
///
/// Cheap gate before the similarity dedup: sensible length, not an injected
/// memory block or XML-ish envelope, not emoji spam, and one of the trigger
/// phrasings ("remember", "I prefer", "we decided", "my X is", always/never).
pub fn should_capture(text: &str) -> bool {
    if text.len() < 10 || text.len() > 500 {
        return false;
    }
    if text.contains("<relevant-memories>") {
        return false;
    }
    if text.starts_with('<') && text.contains("</") {
        return false;
    }
    if emoji_pattern().find_iter(text).count() > 3 {
        return false;
    }
    capture_triggers().iter().any(|r| r.is_match(text))
}

/// Render recalled memories as the system-message block injected ahead of
/// the conversation.
pub fn format_memories_for_context(results: &[MemoryResult]) -> String {
    if results.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = results
        .iter()
        .map(|r| format!("- [{}] {}", r.entry.category, r.entry.text))
        .collect();
    format!(
        "<relevant-memories>\nThe following memories may be relevant to the current conversation:\n{}\n</relevant-memories>",
        lines.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocg_memory::MemoryEntry;

    fn result(category: &str, text: &str) -> MemoryResult {
        MemoryResult {
            entry: MemoryEntry {
                id: "id".into(),
                text: text.into(),
                vector: vec![],
                importance: 0.5,
                category: category.into(),
                source: "manual".into(),
                embedding_dim: 0,
                created_at: 0,
                updated_at: 0,
            },
            score: 0.9,
            matched: true,
        }
    }

    #[test]
    fn trigger_phrases_capture() {
        assert!(should_capture("Remember that I deploy on Fridays"));
        assert!(should_capture("I prefer tabs over spaces"));
        assert!(should_capture("we decided to use postgres"));
        assert!(should_capture("my favorite editor is helix"));
        assert!(should_capture("never push directly to main"));
    }

    #[test]
    fn non_trigger_text_does_not_capture() {
        assert!(!should_capture("what's the weather today?"));
        assert!(!should_capture("ok"));
    }

    #[test]
    fn length_bounds_apply() {
        assert!(!should_capture("remember"));
        assert!(!should_capture(&format!("remember {}", "x".repeat(600))));
    }

    #[test]
    fn injected_blocks_are_rejected() {
        assert!(!should_capture(
            "<relevant-memories>\n- [fact] remember the milk\n</relevant-memories>"
        ));
        assert!(!should_capture("<doc>remember me please</doc>"));
    }

    #[test]
    fn emoji_spam_is_rejected() {
        assert!(!should_capture("remember this 🎉🎉🎉🎉"));
        assert!(should_capture("remember this 🎉"));
    }

    #[test]
    fn formats_memory_block() {
        let block = format_memories_for_context(&[
            result("preference", "user prefers dark mode"),
            result("fact", "deploys happen on fridays"),
        ]);
        assert!(block.starts_with("<relevant-memories>"));
        assert!(block.contains("- [preference] user prefers dark mode"));
        assert!(block.ends_with("</relevant-memories>"));
        assert_eq!(format_memories_for_context(&[]), "");
    }
}
