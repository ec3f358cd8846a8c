//! Response envelope construction and CSV export serialization.

use serde_json::{Value, json};

use quarry_core::Row;

use crate::protocol::{CallToolResponse, ToolContent};

/// Wrap a payload in the success envelope. The payload travels as
/// pretty-printed JSON inside a text block.
pub fn success_response(payload: &Value) -> CallToolResponse {
    CallToolResponse {
        content: vec![ToolContent::Text {
            text: serde_json::to_string_pretty(payload).unwrap_or_default(),
        }],
        is_error: Some(false),
    }
}

/// Wrap an error message in the failure envelope: `{"error": <message>}`
/// inside a text block, with the error flag set.
pub fn error_response(message: impl Into<String>) -> CallToolResponse {
    CallToolResponse {
        content: vec![ToolContent::Text {
            text: serde_json::to_string_pretty(&json!({"error": message.into()}))
                .unwrap_or_default(),
        }],
        is_error: Some(true),
    }
}

/// Success envelope carrying raw text, used for CSV export.
pub fn text_response(text: String) -> CallToolResponse {
    CallToolResponse {
        content: vec![ToolContent::Text { text }],
        is_error: Some(false),
    }
}

/// Serialize rows to CSV. The header comes from the first row's keys in
/// driver order; strings are quoted with internal quotes doubled; nulls and
/// missing fields are empty; other scalars are emitted verbatim. An empty
/// row set yields an empty string with no header.
pub fn rows_to_csv(rows: &[Row]) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };
    let headers: Vec<&str> = first.keys().map(String::as_str).collect();

    let mut csv = headers.join(",");
    csv.push('\n');

    for row in rows {
        let fields: Vec<String> = headers.iter().map(|h| csv_field(row.get(*h))).collect();
        csv.push_str(&fields.join(","));
        csv.push('\n');
    }
    csv
}

fn csv_field(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => format!("\"{}\"", s.replace('"', "\"\"")),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        let mut row = Row::new();
        for (k, v) in pairs {
            row.insert((*k).to_string(), v.clone());
        }
        row
    }

    #[test]
    fn csv_quotes_strings_and_passes_numbers_through() {
        let rows = vec![row(&[("a", json!(1)), ("b", json!("x,y"))])];
        assert_eq!(rows_to_csv(&rows), "a,b\n1,\"x,y\"\n");
    }

    #[test]
    fn csv_of_no_rows_is_empty() {
        assert_eq!(rows_to_csv(&[]), "");
    }

    #[test]
    fn csv_doubles_internal_quotes_and_blanks_nulls() {
        let rows = vec![
            row(&[("name", json!("say \"hi\"")), ("note", Value::Null)]),
            row(&[("name", json!("plain")), ("note", json!(true))]),
        ];
        assert_eq!(
            rows_to_csv(&rows),
            "name,note\n\"say \"\"hi\"\"\",\n\"plain\",true\n"
        );
    }

    #[test]
    fn success_envelope_carries_pretty_json() {
        let response = success_response(&json!({"affected_rows": 3}));
        assert_eq!(response.is_error, Some(false));
        let ToolContent::Text { text } = &response.content[0];
        assert_eq!(text, "{\n  \"affected_rows\": 3\n}");
    }

    #[test]
    fn error_envelope_wraps_the_message() {
        let response = error_response("SQL Error: no such table: ghosts");
        assert_eq!(response.is_error, Some(true));
        let ToolContent::Text { text } = &response.content[0];
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["error"], "SQL Error: no such table: ghosts");
    }
}
