//! Flattens raw agent payloads into one narrative string and one SQL string.
//!
//! The walk is deliberately tolerant: any event or content entry that does
//! not have the expected shape is skipped. Only a payload that arrives as a
//! string and fails to decode is an error.

use serde_json::Value;
use tracing::debug;

pub const MESSAGE_DELTA_EVENT: &str = "message.delta";
pub const TOOL_RESULTS_TYPE: &str = "tool_results";
pub const JSON_RESULT_TYPE: &str = "json";

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("Error processing events: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Text and SQL extracted from every payload of one turn.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AggregatedResponse {
    pub text: String,
    pub sql: String,
}

impl AggregatedResponse {
    pub fn has_text(&self) -> bool {
        !self.text.is_empty()
    }

    pub fn has_sql(&self) -> bool {
        !self.sql.is_empty()
    }
}

/// Running accumulator. Fragments are joined with newlines and the result is
/// trimmed only once, in [`Accumulator::finish`].
#[derive(Debug, Default)]
pub struct Accumulator {
    text: String,
    sql: String,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, payload: &Value) -> Result<(), AggregateError> {
        debug!(payload = %payload, "raw agent response");

        let decoded;
        let payload = match payload {
            Value::String(raw) => {
                decoded = serde_json::from_str::<Value>(raw)?;
                &decoded
            }
            other => other,
        };

        let Some(events) = payload.as_array() else {
            return Ok(());
        };

        for event in events {
            if event.get("event").and_then(Value::as_str) != Some(MESSAGE_DELTA_EVENT) {
                continue;
            }
            let content = event
                .get("data")
                .and_then(|d| d.get("delta"))
                .and_then(|d| d.get("content"))
                .and_then(Value::as_array);

            for item in content.into_iter().flatten() {
                self.absorb_content_item(item);
            }
        }

        Ok(())
    }

    fn absorb_content_item(&mut self, item: &Value) {
        if item.get("type").and_then(Value::as_str) != Some(TOOL_RESULTS_TYPE) {
            return;
        }
        let results = item
            .get(TOOL_RESULTS_TYPE)
            .and_then(|r| r.get("content"))
            .and_then(Value::as_array);

        for result in results.into_iter().flatten() {
            if result.get("type").and_then(Value::as_str) != Some(JSON_RESULT_TYPE) {
                continue;
            }
            let Some(json) = result.get(JSON_RESULT_TYPE) else {
                continue;
            };
            if let Some(sql) = non_empty_str(json, "sql") {
                self.sql.push('\n');
                self.sql.push_str(sql);
            }
            if let Some(text) = non_empty_str(json, "text") {
                self.text.push('\n');
                self.text.push_str(text);
            }
        }
    }

    pub fn finish(self) -> AggregatedResponse {
        AggregatedResponse {
            text: self.text.trim().to_string(),
            sql: self.sql.trim().to_string(),
        }
    }
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Aggregate payloads in order. A decode failure discards everything
/// accumulated so far.
pub fn aggregate(responses: &[Value]) -> Result<AggregatedResponse, AggregateError> {
    let mut acc = Accumulator::new();
    for response in responses {
        acc.absorb(response)?;
    }
    Ok(acc.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delta(results: Value) -> Value {
        json!({
            "event": "message.delta",
            "data": {
                "delta": {
                    "content": [
                        {"type": "tool_results", "tool_results": {"content": results}}
                    ]
                }
            }
        })
    }

    fn text_event(text: &str) -> Value {
        json!([delta(json!([{"type": "json", "json": {"text": text}}]))])
    }

    #[test]
    fn empty_input_yields_empty_strings() {
        assert_eq!(aggregate(&[]).unwrap(), AggregatedResponse::default());
    }

    #[test]
    fn extracts_sql_and_text_from_tool_result() {
        let payload = json!([delta(json!([
            {"type": "json", "json": {"sql": "SELECT 1", "text": "ok"}}
        ]))]);

        let result = aggregate(&[payload]).unwrap();
        assert_eq!(result.text, "ok");
        assert_eq!(result.sql, "SELECT 1");
    }

    #[test]
    fn joins_text_across_responses_in_order() {
        let result = aggregate(&[text_event("A"), text_event("B")]).unwrap();
        assert_eq!(result.text, "A\nB");
        assert!(result.sql.is_empty());
    }

    #[test]
    fn repeated_fragments_are_not_deduplicated() {
        let result = aggregate(&[text_event("same"), text_event("same")]).unwrap();
        assert_eq!(result.text, "same\nsame");
    }

    #[test]
    fn sequential_absorb_matches_batch_aggregate() {
        let a = json!([delta(json!([{"type": "json", "json": {"sql": "SELECT a", "text": "first"}}]))]);
        let b = json!([delta(json!([{"type": "json", "json": {"sql": "SELECT b", "text": "second"}}]))]);

        let mut acc = Accumulator::new();
        acc.absorb(&a).unwrap();
        acc.absorb(&b).unwrap();

        assert_eq!(acc.finish(), aggregate(&[a, b]).unwrap());
    }

    #[test]
    fn string_payload_is_decoded_once() {
        let encoded = Value::String(text_event("from string").to_string());
        let result = aggregate(&[encoded]).unwrap();
        assert_eq!(result.text, "from string");
    }

    #[test]
    fn undecodable_string_payload_discards_partial_results() {
        let payloads = vec![text_event("kept?"), Value::String("{not json".into())];
        let err = aggregate(&payloads).unwrap_err();
        assert!(err.to_string().starts_with("Error processing events"));
    }

    #[test]
    fn sql_stays_empty_without_a_non_empty_fragment() {
        let payload = json!([delta(json!([
            {"type": "json", "json": {"sql": "", "text": "no query needed"}}
        ]))]);
        let result = aggregate(&[payload]).unwrap();
        assert!(!result.has_sql());
        assert!(result.has_text());
    }

    #[test]
    fn unexpected_shapes_are_skipped() {
        let payload = json!([
            "not an object",
            {"event": "message.delta"},
            {"event": "message.delta", "data": {"delta": {"content": "nope"}}},
            {"event": "response.text", "data": {"delta": {"content": [
                {"type": "tool_results", "tool_results": {"content": [{"type": "json", "json": {"text": "wrong event"}}]}}
            ]}}},
            {"event": "message.delta", "data": {"delta": {"content": [
                {"type": "text", "text": "plain text is ignored"},
                {"type": "tool_results", "tool_results": {"content": [
                    {"type": "table", "json": {"text": "wrong result type"}},
                    {"type": "json"},
                    {"type": "json", "json": {"text": 42}},
                    {"type": "json", "json": {"text": "kept"}}
                ]}}
            ]}}}
        ]);

        let result = aggregate(&[payload]).unwrap();
        assert_eq!(result.text, "kept");
        assert!(result.sql.is_empty());
    }

    #[test]
    fn non_array_payload_contributes_nothing() {
        let result = aggregate(&[json!({"event": "message.delta"})]).unwrap();
        assert_eq!(result, AggregatedResponse::default());
    }
}
