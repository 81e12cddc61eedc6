//! Normalized messages and the decoder that builds them from raw fetch results.

use crate::error::{WatchError, WatchResult};
use crate::session::RawMessage;

/// Header fields in the order they appear in the message. Lookups ignore
/// ASCII case; repeated fields keep every value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    fields: Vec<(String, String)>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A fetched message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    uid: u32,
    header: Header,
    body: Vec<u8>,
}

impl Message {
    pub fn new(uid: u32, header: Header, body: Vec<u8>) -> Self {
        Self { uid, header, body }
    }

    /// Server-assigned identifier, unique within the mailbox.
    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn subject(&self) -> Option<&str> {
        self.header.get("Subject")
    }

    pub fn sender(&self) -> Option<&str> {
        self.header.get("From")
    }
}

fn format_addr(addr: &mail_parser::Addr) -> String {
    let name = addr.name.as_ref().map(|n| n.to_string()).unwrap_or_default();
    let email = addr.address.as_ref().map(|s| s.to_string()).unwrap_or_default();
    if name.is_empty() {
        email
    } else {
        format!("{} <{}>", name, email)
    }
}

fn header_value(header: &mail_parser::Header, raw: &[u8]) -> String {
    match header.value() {
        mail_parser::HeaderValue::Text(t) => t.to_string(),
        mail_parser::HeaderValue::TextList(list) => {
            list.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(", ")
        }
        mail_parser::HeaderValue::Address(addr) => format_addr(addr),
        mail_parser::HeaderValue::AddressList(list) => {
            list.iter().map(format_addr).collect::<Vec<_>>().join(", ")
        }
        // Dates, content types and anything else keep their wire form.
        _ => raw
            .get(header.offset_start..header.offset_end)
            .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
            .unwrap_or_default(),
    }
}

/// Parses a raw header block into a [`Header`].
pub fn parse_header(raw: &[u8]) -> WatchResult<Header> {
    let parsed = mail_parser::Message::parse(raw)
        .ok_or_else(|| WatchError::Decode("unparseable header block".to_string()))?;

    let mut header = Header::new();
    for field in parsed.headers() {
        header.push(field.name().to_string(), header_value(field, raw));
    }

    if header.is_empty() {
        return Err(WatchError::Decode("header block has no fields".to_string()));
    }
    Ok(header)
}

/// Turns one raw fetch result into a [`Message`].
pub fn decode(raw: &RawMessage) -> WatchResult<Message> {
    let uid = raw
        .uid
        .ok_or_else(|| WatchError::Decode("fetch response carries no UID".to_string()))?;
    let header_block = raw
        .header
        .as_deref()
        .ok_or_else(|| WatchError::Decode(format!("message {} has no header block", uid)))?;

    let header = parse_header(header_block)
        .map_err(|e| WatchError::Decode(format!("message {}: {}", uid, e)))?;
    let body = raw.body.clone().unwrap_or_default();

    Ok(Message::new(uid, header, body))
}

/// Decodes a whole batch, dropping the items that fail. Order is preserved.
pub fn decode_batch(raws: &[RawMessage]) -> Vec<Message> {
    raws.iter()
        .filter_map(|raw| match decode(raw) {
            Ok(message) => Some(message),
            Err(e) => {
                log::warn!("Skipping undecodable message: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "From: \"Alice Example\" <alice@example.com>\r\n\
To: bob@example.com\r\n\
Subject: Lunch?\r\n\
Received: from a.example.com\r\n\
Received: from b.example.com\r\n\
\r\n";

    fn raw(uid: Option<u32>, header: Option<&str>, body: Option<&str>) -> RawMessage {
        RawMessage {
            uid,
            header: header.map(|h| h.as_bytes().to_vec()),
            body: body.map(|b| b.as_bytes().to_vec()),
        }
    }

    #[test]
    fn test_decode_message() {
        let message = decode(&raw(Some(42), Some(HEADER), Some("See you at noon.\r\n"))).unwrap();
        assert_eq!(message.uid(), 42);
        assert_eq!(message.subject(), Some("Lunch?"));
        assert_eq!(message.sender(), Some("Alice Example <alice@example.com>"));
        assert_eq!(message.body(), b"See you at noon.\r\n");
        assert_eq!(message.body_text(), "See you at noon.\r\n");
    }

    #[test]
    fn test_header_iter_keeps_field_order() {
        let message = decode(&raw(Some(2), Some(HEADER), None)).unwrap();
        let names: Vec<&str> = message.header().iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["From", "To", "Subject", "Received", "Received"]);
        assert_eq!(message.header().len(), 5);
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let message = decode(&raw(Some(1), Some(HEADER), None)).unwrap();
        assert_eq!(message.header().get("subject"), Some("Lunch?"));
        assert_eq!(message.header().get("SUBJECT"), Some("Lunch?"));
        assert_eq!(message.header().get("x-missing"), None);
        assert!(message.header().get_all("x-missing").is_empty());
    }

    #[test]
    fn test_repeated_fields_keep_order() {
        let message = decode(&raw(Some(1), Some(HEADER), None)).unwrap();
        let received = message.header().get_all("received");
        assert_eq!(received.len(), 2);
        assert!(received[0].contains("a.example.com"));
        assert!(received[1].contains("b.example.com"));
    }

    #[test]
    fn test_missing_body_is_empty() {
        let message = decode(&raw(Some(7), Some(HEADER), None)).unwrap();
        assert!(message.body().is_empty());
    }

    #[test]
    fn test_missing_uid_or_header_fails() {
        assert!(matches!(decode(&raw(None, Some(HEADER), None)), Err(WatchError::Decode(_))));
        assert!(matches!(decode(&raw(Some(3), None, Some("x"))), Err(WatchError::Decode(_))));
    }

    #[test]
    fn test_batch_skips_bad_items() {
        let batch = vec![
            raw(Some(10), Some(HEADER), Some("one")),
            raw(None, Some(HEADER), Some("two")),
            raw(Some(12), Some(HEADER), Some("three")),
        ];
        let messages = decode_batch(&batch);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].uid(), 10);
        assert_eq!(messages[1].uid(), 12);
    }
}
