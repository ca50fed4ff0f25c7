//! Incremental server-sent events parser.

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    /// `event:` field; `message` when absent
    pub event: String,
    /// `data:` lines joined with `\n`
    pub data: String,
    /// `id:` field, if any
    pub id: Option<String>,
}

/// Accumulates raw chunks and yields complete events.
///
/// Chunks may split lines, events and multibyte characters anywhere; bytes
/// are buffered and only complete lines are decoded.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    /// Feed a chunk and collect every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&byte| byte == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..pos])
                .trim_end_matches('\r')
                .to_string();

            if line.is_empty() {
                if let Some(message) = self.dispatch() {
                    messages.push(message);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = line.split_once(':').unwrap_or((line.as_str(), ""));
            let value = value.strip_prefix(' ').unwrap_or(value);
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                "id" => self.id = Some(value.to_string()),
                _ => {},
            }
        }

        messages
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseMessage {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
            id,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_events_split_across_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.push(b"id:abc\nevent: PB_CON").is_empty());
        let messages = parser.push(b"NECT\ndata: {\"clientId\":\"abc\"}\r\n\r\n: ping\n\n");

        assert_eq!(
            messages,
            vec![SseMessage {
                event: "PB_CONNECT".to_string(),
                data: r#"{"clientId":"abc"}"#.to_string(),
                id: Some("abc".to_string()),
            }]
        );
    }

    #[test]
    fn joins_multiline_data() {
        let mut parser = SseParser::default();
        let messages = parser.push(b"data: one\ndata: two\n\n");
        assert_eq!(messages[0].event, "message");
        assert_eq!(messages[0].data, "one\ntwo");
    }

    #[test]
    fn keeps_characters_split_between_chunks() {
        let bytes = "data: {\"name\":\"Zoé\"}\n\n".as_bytes();
        let split = bytes.iter().position(|&byte| byte == 0xC3).unwrap() + 1;

        let mut parser = SseParser::default();
        assert!(parser.push(&bytes[..split]).is_empty());
        let messages = parser.push(&bytes[split..]);
        assert_eq!(messages[0].data, r#"{"name":"Zoé"}"#);
    }
}
