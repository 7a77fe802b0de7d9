//! Small text helpers shared by the agent-backed strategies.

/// Truncate to at most `max` characters, ending with `...` when cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

/// Body of the `### <name>` section of a Markdown answer, up to the next
/// `###` heading. Heading match ignores case and a trailing colon.
pub fn extract_section(output: &str, name: &str) -> Option<String> {
    let wanted = name.trim().to_lowercase();
    let mut lines = output.lines();

    for line in lines.by_ref() {
        let Some(heading) = line.trim().strip_prefix("###") else {
            continue;
        };
        let heading = heading.trim().trim_end_matches(':').trim().to_lowercase();
        if heading == wanted {
            let body: Vec<&str> = lines
                .by_ref()
                .take_while(|l| !l.trim_start().starts_with("###"))
                .collect();
            let body = body.join("\n").trim().to_string();
            return Some(body);
        }
    }
    None
}

/// Items of a numbered or bulleted list, markers stripped. `None` (any case)
/// means an empty list.
pub fn list_items(section: &str) -> Vec<String> {
    if section.trim().eq_ignore_ascii_case("none") {
        return Vec::new();
    }
    section
        .lines()
        .map(|line| {
            let line = line.trim();
            let line = line
                .trim_start_matches(|c: char| c.is_ascii_digit())
                .trim_start_matches(['.', ')'])
                .trim_start_matches(['-', '*'])
                .trim();
            line.to_string()
        })
        .filter(|line| !line.is_empty() && !line.eq_ignore_ascii_case("none"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello...");
    }

    #[test]
    fn test_extract_section() {
        let output = "intro\n### Perfected Prompt\nBuild the login API.\nUse JWT.\n### Questions Needed\n1. Which DB?\n2) Token TTL?\n";
        assert_eq!(
            extract_section(output, "Perfected Prompt").as_deref(),
            Some("Build the login API.\nUse JWT.")
        );
        let questions = extract_section(output, "questions needed").unwrap();
        assert_eq!(list_items(&questions), vec!["Which DB?", "Token TTL?"]);
        assert_eq!(extract_section(output, "Analysis"), None);
    }

    #[test]
    fn test_none_list_is_empty() {
        assert!(list_items("None").is_empty());
        assert!(list_items("  none \n").is_empty());
    }
}
