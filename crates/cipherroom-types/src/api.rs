use serde::{Deserialize, Serialize};

use crate::models::{Message, Timestamp};

// -- History --

/// Backward pagination request. `cursor = None` asks for the newest page,
/// otherwise for messages strictly older than `cursor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    pub cursor: Option<Timestamp>,
    pub page_size: u32,
}

impl HistoryQuery {
    pub fn newest(page_size: u32) -> Self {
        Self { cursor: None, page_size }
    }

    pub fn before(cursor: Timestamp, page_size: u32) -> Self {
        Self { cursor: Some(cursor), page_size }
    }

    /// Query-string pairs understood by the history endpoint.
    /// The cursor travels as an RFC 3339 string at full precision; epoch
    /// milliseconds would move it past sub-millisecond keys.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("pageSize", self.page_size.to_string())];
        if let Some(cursor) = self.cursor {
            pairs.push(("cursor", wire_cursor::format(&cursor)));
        }
        pairs
    }
}

/// One page of history, ordered oldest -> newest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    #[serde(default, alias = "messages")]
    pub list: Vec<Message>,
    #[serde(default)]
    pub has_next_page: bool,
    /// Ordering key of the oldest item in `list`; `None` once history is exhausted.
    #[serde(default, alias = "timestamp", with = "wire_cursor")]
    pub next_cursor: Option<Timestamp>,
    /// Server-reported length of the whole conversation.
    #[serde(default)]
    pub total: u64,
}

impl HistoryPage {
    pub fn empty(total: u64) -> Self {
        Self {
            list: Vec::new(),
            has_next_page: false,
            next_cursor: None,
            total,
        }
    }

    pub fn oldest_key(&self) -> Option<Timestamp> {
        self.list.iter().map(Message::ordering_key).min()
    }

    pub fn newest_key(&self) -> Option<Timestamp> {
        self.list.iter().map(Message::ordering_key).max()
    }
}

/// `{ data, error }` wrapper every history response arrives in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self { data: Some(data), error: None }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self { data: None, error: Some(error.into()) }
    }

    pub fn into_result(self) -> Result<T, String> {
        match (self.data, self.error) {
            (_, Some(error)) => Err(error),
            (Some(data), None) => Ok(data),
            (None, None) => Err("response carried neither data nor error".into()),
        }
    }
}

/// Cursor timestamps are written as RFC 3339 with as many fractional digits
/// as needed. Epoch milliseconds are still accepted on input.
mod wire_cursor {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawCursor {
        Millis(i64),
        Text(DateTime<Utc>),
    }

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => s.serialize_str(&format(ts)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<RawCursor>::deserialize(d)? {
            None => Ok(None),
            Some(RawCursor::Text(ts)) => Ok(Some(ts)),
            Some(RawCursor::Millis(ms)) => DateTime::from_timestamp_millis(ms)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("cursor out of range: {}", ms))),
        }
    }
}
