//! Parser for the `[ToolName] {json}` invocations embedded in model output.
//!
//! The scan is left to right. A bracketed token made only of ASCII letters,
//! digits and underscores is a call; any other bracketed text is kept as-is.
//! Arguments are captured by brace counting, so a `{` or `}` inside a JSON
//! string literal will miscount.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedToolCall {
    pub name: String,
    /// Raw JSON object text, absent when no balanced object followed the token.
    pub raw_arguments: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    pub cleaned_text: String,
    pub calls: Vec<ParsedToolCall>,
}

fn is_tool_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Index just past the brace that closes the object opening at `start`.
fn balanced_object_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn extract_tool_calls(text: &str) -> ParsedResponse {
    let mut calls = Vec::new();
    let mut cleaned = String::with_capacity(text.len());
    let mut cursor = 0;

    while cursor < text.len() {
        let Some(start) = text[cursor..].find('[').map(|i| cursor + i) else {
            cleaned.push_str(&text[cursor..]);
            break;
        };
        let Some(end) = text[start + 1..].find(']').map(|i| start + 1 + i) else {
            cleaned.push_str(&text[cursor..]);
            break;
        };

        let name = text[start + 1..end].trim();
        if !is_tool_name(name) {
            cleaned.push_str(&text[cursor..=end]);
            cursor = end + 1;
            continue;
        }

        cleaned.push_str(&text[cursor..start]);

        let after_token = &text[end + 1..];
        let argument_start = end
            + 1
            + after_token
                .char_indices()
                .find(|(_, c)| !c.is_whitespace())
                .map(|(i, _)| i)
                .unwrap_or(after_token.len());

        let mut raw_arguments = None;
        cursor = argument_start;
        if text[argument_start..].starts_with('{') {
            if let Some(close) = balanced_object_end(text, argument_start) {
                raw_arguments = Some(text[argument_start..close].to_string());
                cursor = close;
            }
        }

        calls.push(ParsedToolCall {
            name: name.to_string(),
            raw_arguments,
        });
    }

    let cleaned_text = cleaned
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    ParsedResponse {
        cleaned_text,
        calls,
    }
}
