//! Pull a single SQL statement out of noisy LLM output.
//!
//! Models wrap their answers in channel markers, code fences, labels and
//! markdown escapes. This module peels those layers in a fixed order and
//! returns a cleaned, semicolon-terminated statement, or an empty string
//! when no SQL-like content is found. It never errors; callers must treat
//! `""` as extraction failure.

use regex::Regex;

const CHANNEL_MARKER: &str = "<|channel|>";

/// Extract a SQL statement from raw model text.
///
/// Stages: channel isolation → marker stripping → fence extraction → label
/// stripping → statement location → whitespace/escape cleanup.
pub fn extract_sql(raw_text: &str) -> String {
    let trimmed = raw_text.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let candidate = take_last_channel_block(trimmed);
    let candidate = strip_markers(&candidate);
    let candidate = candidate.trim();

    let fence_re = Regex::new(r"(?is)```(?:sql)?\s*(.*?)```").unwrap();
    let candidate = match fence_re.captures(candidate) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()).trim().to_string(),
        None => candidate.to_string(),
    };

    let candidate = strip_leading_labels(&candidate);

    let statement_re = Regex::new(
        r"(?is)(?:SELECT|INSERT|UPDATE|DELETE|WITH|SHOW|DESCRIBE|EXPLAIN|CALL).*?;",
    )
    .unwrap();
    if let Some(m) = statement_re.find(&candidate) {
        return cleanup_sql_whitespace(m.as_str());
    }

    let fallback_re =
        Regex::new(r"(?is)(?:SELECT|INSERT|UPDATE|DELETE|WITH|DESCRIBE|SHOW|EXPLAIN|CALL).*")
            .unwrap();
    if let Some(m) = fallback_re.find(&candidate) {
        return cleanup_sql_whitespace(m.as_str());
    }

    String::new()
}

/// A channel-delimited segment: the label between `<|channel|>` and the
/// closing `>`, and the content up to the next marker's line.
fn channel_segments(text: &str) -> Vec<(String, String)> {
    let mut positions = Vec::new();
    let mut from = 0;
    while let Some(rel) = text[from..].find(CHANNEL_MARKER) {
        positions.push(from + rel);
        from += rel + CHANNEL_MARKER.len();
    }

    let mut segments = Vec::new();
    for (i, &pos) in positions.iter().enumerate() {
        let after = pos + CHANNEL_MARKER.len();
        let end = positions.get(i + 1).copied().unwrap_or(text.len());
        let region = &text[after..end];
        let Some(gt) = region.find('>') else { continue };
        let label = region[..gt].trim().to_string();
        let mut content = &region[gt + 1..];
        // The next marker's own line (role prefix etc.) is not part of this
        // segment's content.
        if end != text.len() {
            if let Some(nl) = content.rfind('\n') {
                content = &content[..nl];
            }
        }
        segments.push((label, content.trim().to_string()));
    }
    segments
}

/// Pick the segment the answer lives in: the last "final"-labeled block,
/// else the last block of any label, else the text after the last `>`.
fn take_last_channel_block(text: &str) -> String {
    if !text.contains(CHANNEL_MARKER) {
        return text.trim().to_string();
    }

    let segments = channel_segments(text);

    if let Some((_, content)) = segments
        .iter()
        .rev()
        .find(|(label, _)| label.to_lowercase().starts_with("final"))
    {
        return content.clone();
    }
    if let Some((_, content)) = segments.last() {
        return content.clone();
    }

    if let Some(pos) = text.rfind('>') {
        let candidate = text[pos + 1..].trim();
        if !candidate.is_empty() {
            return candidate.to_string();
        }
    }

    text.trim().to_string()
}

/// Remove control-like bracket tokens (turn markers, channel markers, role
/// labels), leaving plain text.
fn strip_markers(text: &str) -> String {
    let turn_re = Regex::new(r"(?i)<\|start\|>|<\|end\|>|<\|im_start\|>|<\|im_end\|>").unwrap();
    let result = turn_re.replace_all(text, " ");

    let channel_re = Regex::new(r"(?i)(?:assistant|user|system)?<\|channel\|>[^>]*>").unwrap();
    let result = channel_re.replace_all(&result, " ");

    let any_token_re = Regex::new(r"<\|[^>]+\|>").unwrap();
    let result = any_token_re.replace_all(&result, " ");

    result
        .replace("|>", " ")
        .replace("<|", " ")
        .replace('\u{a0}', " ")
}

/// Strip a single leading "SQL:" / "Output:" / "Query:" style label.
fn strip_leading_labels(text: &str) -> String {
    let patterns = [
        r"(?i)^[^A-Za-z0-9]*SQL\s*(?:statement)?(?:\s*only)?\s*[:\-]?",
        r"(?i)^[^A-Za-z0-9]*Output\s*[:\-]?",
        r"(?i)^[^A-Za-z0-9]*Query\s*[:\-]?",
        r"(?i)^[^A-Za-z0-9]*Answer\s*[:\-]?",
        r"(?i)^[^A-Za-z0-9]*Response\s*[:\-]?",
    ];
    let mut result = text.to_string();
    for pattern in patterns {
        let re = Regex::new(pattern).unwrap();
        result = re.replace(&result, "").to_string();
    }
    result.trim().to_string()
}

/// Normalize line endings, collapse blank runs, strip markdown/escape
/// artifacts, and guarantee a trailing semicolon.
fn cleanup_sql_whitespace(sql: &str) -> String {
    let mut result = sql
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\t', " ");

    let trailing_ws_re = Regex::new(r"[ \t]+\n").unwrap();
    result = trailing_ws_re.replace_all(&result, "\n").to_string();
    let blank_runs_re = Regex::new(r"\n{3,}").unwrap();
    result = blank_runs_re.replace_all(&result, "\n\n").to_string();
    result = result.trim().to_string();

    result = result.replace("**", "");
    let mid_star_re = Regex::new(r"(\w)\*(\w)").unwrap();
    result = mid_star_re.replace_all(&result, "$1$2").to_string();
    let end_star_re = Regex::new(r"([A-Za-z0-9_])\*([^A-Za-z0-9_])").unwrap();
    result = end_star_re.replace_all(&result, "$1$2").to_string();

    result = result
        .replace("\\`", "`")
        .replace("\\_", "_")
        .replace("\\*", "*")
        .replace("\\%", "%")
        .replace("\\-", "-")
        .replace("\\n", "\n")
        .replace("\\r", "\n")
        .replace("\\t", "\t")
        .replace("\\\\", "\\");
    let escaped_punct_re = Regex::new(r"\\([.,;])").unwrap();
    result = escaped_punct_re.replace_all(&result, "$1").to_string();
    let escaped_ws_re = Regex::new(r"\\\s").unwrap();
    result = escaped_ws_re.replace_all(&result, " ").to_string();

    result = trailing_ws_re.replace_all(&result, "\n").trim().to_string();

    let terminated_re = Regex::new(r";\s*$").unwrap();
    if !result.is_empty() && !terminated_re.is_match(&result) {
        result = format!("{};", result.trim_end());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn normalized(sql: &str) -> String {
        sql.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_plain_statement_passthrough() {
        assert_eq!(extract_sql("SELECT * FROM users;"), "SELECT * FROM users;");
    }

    #[test]
    fn test_missing_semicolon_appended() {
        assert_eq!(extract_sql("SELECT 1"), "SELECT 1;");
    }

    #[test]
    fn test_fenced_block() {
        let text = "Here you go:\n```sql\nSELECT id FROM orders;\n```\nHope that helps!";
        assert_eq!(extract_sql(text), "SELECT id FROM orders;");
    }

    #[test]
    fn test_untagged_fence() {
        let text = "```\nSELECT 1;\n```";
        assert_eq!(extract_sql(text), "SELECT 1;");
    }

    #[test]
    fn test_first_fence_wins() {
        let text = "```sql\nSELECT a FROM t1;\n```\nor maybe\n```sql\nSELECT b FROM t2;\n```";
        assert_eq!(extract_sql(text), "SELECT a FROM t1;");
    }

    #[test]
    fn test_sql_label_stripped() {
        assert_eq!(extract_sql("SQL: SELECT 1;"), "SELECT 1;");
        assert_eq!(extract_sql("Query - SELECT 1;"), "SELECT 1;");
        assert_eq!(extract_sql("Answer: SELECT 1;"), "SELECT 1;");
    }

    #[test]
    fn test_no_sql_returns_empty() {
        assert_eq!(extract_sql("I cannot answer that question."), "");
        assert_eq!(extract_sql(""), "");
        assert_eq!(extract_sql("   \n  "), "");
    }

    #[test]
    fn test_prose_before_statement_dropped() {
        let text = "The query you want is SELECT name FROM users WHERE id = 3; and that's it.";
        assert_eq!(extract_sql(text), "SELECT name FROM users WHERE id = 3;");
    }

    #[test]
    fn test_channel_final_block_selected() {
        let text = "<|channel|>analysis>Let me think about joins here\n\
                    assistant<|channel|>final>SELECT * FROM devices;";
        assert_eq!(extract_sql(text), "SELECT * FROM devices;");
    }

    #[test]
    fn test_last_final_block_wins() {
        let text = "<|channel|>final>SELECT 1;\n\
                    assistant<|channel|>final>SELECT 2;";
        assert_eq!(extract_sql(text), "SELECT 2;");
    }

    #[test]
    fn test_second_segment_labeled_final_wins() {
        // Only the second of two segments is labeled "final"; output must
        // derive from it alone.
        let text = "<|channel|>analysis>SELECT wrong FROM draft;\n\
                    assistant<|channel|>final>SELECT right FROM answer;";
        assert_eq!(extract_sql(text), "SELECT right FROM answer;");
    }

    #[test]
    fn test_no_final_label_takes_last_segment() {
        let text = "<|channel|>analysis>SELECT 1;\n\
                    assistant<|channel|>commentary>SELECT 2;";
        assert_eq!(extract_sql(text), "SELECT 2;");
    }

    #[test]
    fn test_unparseable_channel_takes_text_after_last_marker() {
        let text = "junk <|channel|garbled> SELECT 3;";
        assert_eq!(extract_sql(text), "SELECT 3;");
    }

    #[test]
    fn test_turn_markers_stripped() {
        let text = "<|im_start|>assistant SELECT 5;<|im_end|>";
        assert_eq!(extract_sql(text), "SELECT 5;");
    }

    #[test]
    fn test_escaped_markdown_artifacts() {
        let text = "SELECT \\`name\\` FROM \\`users\\` WHERE a LIKE 'x\\%';";
        assert_eq!(extract_sql(text), "SELECT `name` FROM `users` WHERE a LIKE 'x%';");
    }

    #[test]
    fn test_bold_markers_removed() {
        let text = "**SELECT** id FROM t;";
        assert_eq!(extract_sql(text), "SELECT id FROM t;");
    }

    #[test]
    fn test_blank_line_runs_collapsed() {
        let text = "SELECT a\n\n\n\nFROM t;";
        assert_eq!(extract_sql(text), "SELECT a\n\nFROM t;");
    }

    #[test]
    fn test_with_cte_keyword() {
        let text = "WITH recent AS (SELECT * FROM logs) SELECT * FROM recent;";
        assert_eq!(extract_sql(text), text);
    }

    #[test]
    fn test_show_and_describe_keywords() {
        assert_eq!(extract_sql("SHOW TABLES;"), "SHOW TABLES;");
        assert_eq!(extract_sql("DESCRIBE users"), "DESCRIBE users;");
    }

    #[test]
    fn test_stops_at_first_semicolon() {
        let text = "SELECT 1; SELECT 2;";
        assert_eq!(extract_sql(text), "SELECT 1;");
    }

    #[test]
    fn test_fence_and_label_combined() {
        let text = "```sql\nSQL: SELECT x FROM y;\n```";
        assert_eq!(extract_sql(text), "SELECT x FROM y;");
    }

    #[test]
    fn test_malformed_escapes_never_panic() {
        let text = "SELECT '\\";
        let out = extract_sql(text);
        assert!(out.ends_with(';'));
    }

    #[test]
    fn test_round_trip_through_wrappers() {
        let sql = "SELECT id, name FROM customers WHERE city = 'Istanbul';";
        let wrappers = [
            format!("```sql\n{sql}\n```"),
            format!("SQL: {sql}"),
            format!("<|channel|>final>{sql}"),
            format!("Sure!\n\n```\n{sql}\n```\n\nLet me know."),
        ];
        for wrapped in wrappers {
            assert_eq!(normalized(&extract_sql(&wrapped)), normalized(sql), "wrapper: {wrapped}");
        }
    }

    proptest! {
        #[test]
        fn prop_never_panics(input in "\\PC{0,200}") {
            let _ = extract_sql(&input);
        }

        #[test]
        fn prop_no_keyword_means_empty(noise in "[a-z ,.!?]{0,80}") {
            // Lowercase prose without SQL keywords must yield "" — the regex
            // is case-insensitive, so exclude accidental keyword substrings.
            let keywords = ["select", "insert", "update", "delete", "with",
                            "show", "describe", "explain", "call"];
            prop_assume!(!keywords.iter().any(|k| noise.contains(k)));
            prop_assert_eq!(extract_sql(&noise), "");
        }

        #[test]
        fn prop_extracted_sql_ends_with_semicolon(body in "[a-zA-Z0-9_ ]{1,40}") {
            let out = extract_sql(&format!("SELECT {body}"));
            prop_assert!(out.ends_with(';'));
        }
    }
}
