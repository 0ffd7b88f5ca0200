//! Structure-preserving truncation of Markdown documents.
//!
//! Reduces a document to approximately a target token count while keeping
//! the lines that carry the most structural salience: headings survive
//! unconditionally, list and emphasis items fill the remaining budget, plain
//! prose comes last, and blank lines and code-fence markers are dropped
//! outright. Selected lines are reassembled in their original order so the
//! result still reads top to bottom.
//!
//! The token budget is applied through a line-count ratio: the ratio of
//! desired tokens to current tokens is applied to the document's line count,
//! treating tokens and lines as proportionally linked. That is a deliberate
//! approximation, not an exact budget guarantee. Like everything in
//! [`budget`](crate::budget), these functions are pure and never fail.

use crate::budget::estimate_tokens;

/// Literal marker appended when truncation removed more than half of the text.
pub const TRUNCATION_NOTICE: &str = "\n\n... (content truncated for token optimization)";

/// Reduce `content` to fit within `target_tokens`.
///
/// Returns the input unchanged when `target_tokens` is `None` (unlimited)
/// or when the content already fits the budget.
pub fn optimize_content(content: &str, target_tokens: Option<usize>) -> String {
    let Some(target) = target_tokens else {
        return content.to_string();
    };

    let current = estimate_tokens(content);
    if current <= target {
        return content.to_string();
    }

    structural_truncate(content, target as f64 / current as f64)
}

/// Line class in decreasing order of salience.
#[derive(PartialEq, Eq, Clone, Copy)]
enum LineClass {
    Header,
    ListItem,
    Other,
    /// Blank lines and fence markers; never selected.
    Dropped,
}

fn classify(line: &str) -> LineClass {
    let stripped = line.trim();
    if stripped.starts_with('#') {
        LineClass::Header
    } else if stripped.starts_with('-') || stripped.starts_with('*') || stripped.starts_with("1.") {
        LineClass::ListItem
    } else if !stripped.is_empty() && !stripped.starts_with("```") {
        LineClass::Other
    } else {
        LineClass::Dropped
    }
}

/// Truncate to approximately `ratio` of the original line count, preferring
/// headers, then list items, then everything else, in original order.
fn structural_truncate(content: &str, ratio: f64) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let target_lines = (lines.len() as f64 * ratio) as usize;

    let classes: Vec<LineClass> = lines.iter().map(|l| classify(l)).collect();
    let mut selected = vec![false; lines.len()];

    // Headers are never dropped, even when they alone blow the budget.
    let mut header_count = 0;
    for (i, class) in classes.iter().enumerate() {
        if *class == LineClass::Header {
            selected[i] = true;
            header_count += 1;
        }
    }

    // Fill the remaining budget from list/emphasis items, then prose,
    // both in original order. The budget saturates at zero: once headers
    // exhaust it, later classes contribute nothing.
    let mut remaining = target_lines.saturating_sub(header_count);
    for class in [LineClass::ListItem, LineClass::Other] {
        for (i, c) in classes.iter().enumerate() {
            if remaining == 0 {
                break;
            }
            if *c == class && !selected[i] {
                selected[i] = true;
                remaining -= 1;
            }
        }
    }

    let kept: Vec<&str> = lines
        .iter()
        .zip(&selected)
        .filter(|(_, keep)| **keep)
        .map(|(line, _)| *line)
        .collect();
    let mut result = kept.join("\n");

    if result.len() * 2 < content.len() {
        result.push_str(TRUNCATION_NOTICE);
    }

    result
}

/// Produce a short outline of a document: a table of contents built from its
/// first ten headers, or a plain prefix when it has none. Capped at
/// `max_length` characters with a `...` continuation marker.
pub fn outline(content: &str, max_length: usize) -> String {
    let headers: Vec<&str> = content
        .split('\n')
        .map(str::trim)
        .filter(|line| line.starts_with('#'))
        .collect();

    let summary = if headers.is_empty() {
        content.chars().take(max_length).collect()
    } else {
        format!(
            "Table of Contents:\n{}",
            headers
                .iter()
                .take(10)
                .copied()
                .collect::<Vec<_>>()
                .join("\n")
        )
    };

    if summary.chars().count() > max_length {
        let capped: String = summary.chars().take(max_length).collect();
        format!("{capped}...")
    } else {
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Guide

Intro paragraph explaining the purpose of this document in some detail.

## Rules

- first rule to follow
- second rule to follow
* emphasized point

```
fn example() {}
```

More prose after the code block, adding additional explanation text.
Another prose line with further detail about the rules above.
";

    #[test]
    fn no_op_when_budget_is_sufficient() {
        let current = estimate_tokens(SAMPLE);
        assert_eq!(optimize_content(SAMPLE, Some(current)), SAMPLE);
        assert_eq!(optimize_content(SAMPLE, Some(current + 100)), SAMPLE);
    }

    #[test]
    fn no_op_when_unlimited() {
        assert_eq!(optimize_content(SAMPLE, None), SAMPLE);
    }

    #[test]
    fn headers_always_survive() {
        let result = optimize_content(SAMPLE, Some(5));
        for line in SAMPLE.split('\n') {
            if line.trim_start().starts_with('#') {
                assert!(
                    result.contains(line),
                    "header line {line:?} was dropped from {result:?}"
                );
            }
        }
    }

    #[test]
    fn shrinks_long_repeated_content_under_budget() {
        let input = "Hello world. ".repeat(200);
        let result = optimize_content(&input, Some(50));
        assert!(estimate_tokens(&result) <= 50);
        assert!(result.len() < input.len());
    }

    #[test]
    fn notice_appended_when_more_than_half_removed() {
        let input = "Hello world. ".repeat(200);
        let result = optimize_content(&input, Some(50));
        assert!(result.ends_with("... (content truncated for token optimization)"));
    }

    #[test]
    fn fences_and_blanks_dropped_once_truncating() {
        let result = optimize_content(SAMPLE, Some(estimate_tokens(SAMPLE) / 2));
        assert!(!result.contains("```"));
    }

    #[test]
    fn list_items_preferred_over_prose() {
        // Budget: both headers plus two more lines. The extra slots must go
        // to the first list items, not to the earlier intro prose.
        let lines = SAMPLE.split('\n').count();
        let current = estimate_tokens(SAMPLE);
        // Smallest target for which floor(lines * target / current) == 4.
        let target = 4 * current / lines + 1;
        let result = optimize_content(SAMPLE, Some(target));
        assert!(result.contains("- first rule to follow"));
        assert!(result.contains("- second rule to follow"));
        assert!(!result.contains("Intro paragraph"));
    }

    #[test]
    fn selection_preserves_original_order() {
        let result = optimize_content(SAMPLE, Some(estimate_tokens(SAMPLE) / 2));
        let guide = result.find("# Guide").expect("missing # Guide");
        let rules = result.find("## Rules").expect("missing ## Rules");
        assert!(guide < rules);
    }

    #[test]
    fn outline_uses_headers_when_present() {
        let result = outline(SAMPLE, 500);
        assert!(result.starts_with("Table of Contents:"));
        assert!(result.contains("# Guide"));
        assert!(result.contains("## Rules"));
    }

    #[test]
    fn outline_falls_back_to_prefix_without_headers() {
        // The no-header branch already takes at most max_length chars, so
        // the continuation marker never fires on this path.
        let result = outline("just some plain text without structure", 10);
        assert_eq!(result, "just some ");
    }

    #[test]
    fn outline_header_listing_is_capped_with_marker() {
        let doc = "\
# A very long header line about configuration
# Another very long header line about testing
";
        let result = outline(doc, 30);
        assert!(result.starts_with("Table of Contents:"));
        assert_eq!(result.chars().count(), 33);
        assert!(result.ends_with("..."));
    }

    #[test]
    fn outline_caps_header_count_at_ten() {
        let doc: String = (0..20).map(|i| format!("# H{i}\n")).collect();
        let result = outline(&doc, 500);
        assert!(result.contains("# H9"));
        assert!(!result.contains("# H10"));
    }
}
