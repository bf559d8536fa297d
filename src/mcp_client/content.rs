//! Turning a `tools/call` result into the text handed back to the caller.

use serde_json::{Map, Value};

use super::errors::McpError;

/// Returned when a tool call succeeds without producing any output.
pub const SUCCESS_SENTINEL: &str = "Tool executed successfully";

/// Extract the caller-facing output of a successful `tools/call`.
///
/// Precedence:
/// 1. first element of a non-empty `content` array: its `text`, else a string
///    `data` field, else `ContentFormatError`;
/// 2. otherwise, if the result carries anything besides `content`, the whole
///    result as compact JSON;
/// 3. otherwise [`SUCCESS_SENTINEL`]. Side-effect-only tools often reply with
///    an empty result.
pub fn extract_tool_output(tool: &str, result: &Map<String, Value>) -> Result<String, McpError> {
    if let Some(first) = result
        .get("content")
        .and_then(|c| c.as_array())
        .and_then(|items| items.first())
    {
        let Some(item) = first.as_object() else {
            return Err(content_error(tool, "invalid content format"));
        };
        if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
            return Ok(text.to_string());
        }
        if let Some(data) = item.get("data").and_then(|d| d.as_str()) {
            return Ok(data.to_string());
        }
        return Err(content_error(tool, "no text in content"));
    }

    let has_payload = result.keys().any(|k| k != "content");
    if has_payload {
        return serde_json::to_string(result)
            .map_err(|e| content_error(tool, &format!("failed to serialize result: {e}")));
    }

    Ok(SUCCESS_SENTINEL.to_string())
}

fn content_error(tool: &str, reason: &str) -> McpError {
    McpError::ContentFormatError {
        tool: tool.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_text_content() {
        let result = obj(json!({"content": [{"type": "text", "text": "42"}]}));
        assert_eq!(extract_tool_output("t", &result).unwrap(), "42");
    }

    #[test]
    fn test_only_first_content_item_is_used() {
        let result = obj(json!({"content": [{"text": "a"}, {"text": "b"}]}));
        assert_eq!(extract_tool_output("t", &result).unwrap(), "a");
    }

    #[test]
    fn test_data_content() {
        let result = obj(json!({"content": [{"type": "image", "data": "aGVsbG8=", "mimeType": "image/png"}]}));
        assert_eq!(extract_tool_output("t", &result).unwrap(), "aGVsbG8=");
    }

    #[test]
    fn test_non_string_data_is_format_error() {
        let result = obj(json!({"content": [{"data": {"nested": true}}]}));
        let err = extract_tool_output("shot", &result).unwrap_err();
        match err {
            McpError::ContentFormatError { tool, reason } => {
                assert_eq!(tool, "shot");
                assert_eq!(reason, "no text in content");
            }
            other => panic!("expected ContentFormatError, got {other:?}"),
        }
    }

    #[test]
    fn test_non_object_content_item_is_format_error() {
        let result = obj(json!({"content": ["plain"]}));
        assert!(matches!(
            extract_tool_output("t", &result),
            Err(McpError::ContentFormatError { .. })
        ));
    }

    #[test]
    fn test_empty_content_and_empty_result_is_sentinel() {
        assert_eq!(
            extract_tool_output("t", &obj(json!({"content": []}))).unwrap(),
            SUCCESS_SENTINEL
        );
        assert_eq!(extract_tool_output("t", &Map::new()).unwrap(), SUCCESS_SENTINEL);
    }

    #[test]
    fn test_structured_result_without_content_is_serialized() {
        let result = obj(json!({"url": "https://example.com", "status": 200}));
        let out = extract_tool_output("navigate", &result).unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["status"], 200);
        assert_eq!(parsed["url"], "https://example.com");
    }
}
