//! Line-delimited JSON codec.
//!
//! One JSON document per line in both directions. Providers are not trusted
//! to keep stdout clean, so anything on the output stream that is not a
//! JSON-RPC response is classified as noise instead of failing the read.

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::types::JsonRpcResponse;

/// Classification of one line read from the provider's stdout.
#[derive(Debug, Clone)]
pub enum DecodedLine {
    /// Empty after trimming. Not counted as noise.
    Blank,
    /// Non-JSON text, or JSON that is not a well-formed response.
    Noise(String),
    /// A JSON-RPC response.
    Response(JsonRpcResponse),
}

/// Serialize a message to compact JSON terminated by a single `\n`.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Classify a raw line from the provider's stdout.
///
/// Bytes that are not valid UTF-8 are noise; the text kept for logging is
/// decoded lossily.
pub fn decode_line(raw: &[u8]) -> DecodedLine {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(_) => {
            let lossy = String::from_utf8_lossy(raw);
            let trimmed = lossy.trim();
            if trimmed.is_empty() {
                return DecodedLine::Blank;
            }
            return DecodedLine::Noise(trimmed.to_string());
        }
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return DecodedLine::Blank;
    }
    match serde_json::from_str::<JsonRpcResponse>(trimmed) {
        Ok(resp) if resp.is_well_formed() => DecodedLine::Response(resp),
        _ => DecodedLine::Noise(trimmed.to_string()),
    }
}

/// Write an encoded line in one `write_all`, then flush.
pub async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::types::JsonRpcRequest;

    #[test]
    fn test_encode_is_single_line() {
        let params = serde_json::json!({"text": "multi\nline"});
        let line = encode_line(&JsonRpcRequest::new(1, "tools/call", Some(params))).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_decode_blank() {
        assert!(matches!(decode_line(b""), DecodedLine::Blank));
        assert!(matches!(decode_line(b"   \r\n"), DecodedLine::Blank));
    }

    #[test]
    fn test_decode_plain_text_is_noise() {
        match decode_line(b"server starting...\n") {
            DecodedLine::Noise(text) => assert_eq!(text, "server starting..."),
            other => panic!("expected noise, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_json_that_is_not_a_response_is_noise() {
        assert!(matches!(
            decode_line(br#"{"level":"info","msg":"ready"}"#),
            DecodedLine::Noise(_)
        ));
        assert!(matches!(
            decode_line(br#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#),
            DecodedLine::Noise(_)
        ));
        assert!(matches!(
            decode_line(br#"{"jsonrpc":"1.0","id":1,"result":{}}"#),
            DecodedLine::Noise(_)
        ));
    }

    #[test]
    fn test_decode_response_with_surrounding_whitespace() {
        match decode_line(b"  {\"jsonrpc\":\"2.0\",\"id\":4,\"result\":{\"ok\":true}}  \n") {
            DecodedLine::Response(resp) => {
                assert_eq!(resp.id, 4);
                assert_eq!(resp.result.unwrap()["ok"], true);
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_invalid_utf8_is_noise() {
        match decode_line(b"caf\xe9 starting\n") {
            DecodedLine::Noise(text) => assert_eq!(text, "caf\u{fffd} starting"),
            other => panic!("expected noise, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_write_line_flushes_whole_line() {
        let mut buf: Vec<u8> = Vec::new();
        write_line(&mut buf, "{\"a\":1}\n").await.unwrap();
        assert_eq!(buf, b"{\"a\":1}\n");
    }
}
