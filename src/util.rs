//! Shared utility functions for the popeye crate.

use uuid::Uuid;

/// Pull the outermost JSON object out of a provider completion.
///
/// Reviewer votes and audit findings arrive wrapped in prose, code fences,
/// or sign-off chatter; this scans for the first `{`, tracks brace depth
/// (string- and escape-aware, so braces inside issue descriptions don't
/// derail it), and returns the balanced object for serde to parse. `None`
/// means the completion carried no usable structure and the caller falls
/// back to its failure path, e.g. a synthetic REJECT vote.
pub fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut end = start;

    for (i, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    end = start + i + 1;
                    break;
                }
            }
            _ => {}
        }
    }

    if depth == 0 && end > start {
        Some(text[start..end].to_string())
    } else {
        None
    }
}

/// First eight hex digits of a UUID, used in artifact filenames.
pub fn short_id(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// Bound a blob of process output to `max` characters, keeping the tail.
/// Error output usually ends with the interesting part.
pub fn summarize_output(output: &str, max: usize) -> String {
    let trimmed = output.trim();
    if trimmed.chars().count() <= max {
        return trimmed.to_string();
    }
    let tail: String = trimmed
        .chars()
        .rev()
        .take(max)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_vote_from_reviewer_chatter() {
        let completion = r#"I reviewed the plan packet carefully.

{"vote": "APPROVE", "confidence": 0.9, "blocking_issues": [], "suggestions": []}

Happy to re-review after revisions."#;
        assert_eq!(
            extract_json_object(completion),
            Some(
                r#"{"vote": "APPROVE", "confidence": 0.9, "blocking_issues": [], "suggestions": []}"#
                    .to_string()
            )
        );
    }

    #[test]
    fn test_extracts_nested_findings_envelope() {
        let completion = r#"```json
{"findings": [{"severity": "P2", "category": "security", "description": "token logged", "blocking": false}]}
```"#;
        let json = extract_json_object(completion).unwrap();
        assert!(json.starts_with(r#"{"findings""#));
        assert!(json.ends_with("]}"));
        assert!(json.contains(r#""severity": "P2""#));
        assert!(!json.contains("```"));
    }

    #[test]
    fn test_braces_inside_blocking_issue_text() {
        // Issue descriptions routinely quote code; stray braces in them
        // must not end the object early
        let completion =
            r#"{"vote": "REJECT", "confidence": 1.0, "blocking_issues": ["handler returns Err(e) => {} silently"]}"#;
        assert_eq!(extract_json_object(completion), Some(completion.to_string()));
    }

    #[test]
    fn test_prose_refusal_has_no_object() {
        let completion = "I am unable to vote on this plan without the referenced artifacts.";
        assert_eq!(extract_json_object(completion), None);
    }

    #[test]
    fn test_truncated_vote_is_not_extracted() {
        // A completion cut off mid-vote never balances
        let completion = r#"{"vote": "CONDITIONAL", "confidence": 0.7, "blocking_issues": ["#;
        assert_eq!(extract_json_object(completion), None);
    }

    #[test]
    fn test_short_id_is_eight_hex_chars() {
        let id = Uuid::new_v4();
        let short = short_id(&id);
        assert_eq!(short.len(), 8);
        assert!(short.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_summarize_output_short_passthrough() {
        assert_eq!(summarize_output("  error: boom  ", 100), "error: boom");
    }

    #[test]
    fn test_summarize_output_keeps_tail() {
        let long = format!("{}END", "x".repeat(600));
        let summary = summarize_output(&long, 100);
        assert!(summary.starts_with("..."));
        assert!(summary.ends_with("END"));
        assert!(summary.chars().count() <= 103);
    }
}
