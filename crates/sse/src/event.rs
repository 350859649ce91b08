//! Server-Sent Event value type
//!
//! A record is the text between two blank lines. Parsing a record never fails:
//! anything the protocol doesn't recognize is dropped on the floor.

use serde::{Deserialize, Serialize};

/// Event name used when a record carries no `event` field
pub const MESSAGE_EVENT: &str = "message";

/// One parsed event. Every field is optional; repeated fields inside a
/// record are joined with `\n` in order of appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSentEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: Option<String>,
    /// Reconnect delay in milliseconds
    pub retry: Option<u64>,
}

impl ServerSentEvent {
    /// Parse a single record (without its terminating blank line).
    ///
    /// Returns `None` for comment records and for records that carry no
    /// recognized field at all.
    pub fn parse_record(record: &str) -> Option<Self> {
        if record.starts_with(':') {
            return None;
        }

        let lines: Vec<&str> = record.lines().flat_map(|line| line.split('\r')).collect();
        let mut fields = Fields::default();
        for (index, line) in lines.iter().enumerate() {
            match parse_line(line, lines.get(index + 1).copied()) {
                Some(Line::Field { key, value }) => fields.append(key, value),
                Some(Line::Unlabeled(value)) => {
                    tracing::trace!(value, "Dropping unlabeled trailing value");
                }
                None => {}
            }
        }

        let event = fields.into_event();
        if event.is_empty() {
            None
        } else {
            Some(event)
        }
    }

    /// Only carries reconnect information; never delivered to listeners.
    pub fn is_retry_only(&self) -> bool {
        self.id.is_none() && self.event.is_none() && self.data.is_none() && self.retry.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.event.is_none() && self.data.is_none() && self.retry.is_none()
    }

    /// Name used for listener dispatch
    pub fn event_name(&self) -> &str {
        self.event.as_deref().unwrap_or(MESSAGE_EVENT)
    }

    /// Whether the general `message` listener receives this event
    pub fn is_message(&self) -> bool {
        self.event_name() == MESSAGE_EVENT
    }
}

enum Line<'a> {
    Field { key: &'a str, value: &'a str },
    /// Colon-less final line of a record
    Unlabeled(&'a str),
}

/// `next` is the following line of the record, if any. A field with an
/// empty value borrows it as the value; the next line is still parsed on
/// its own as well.
fn parse_line<'a>(line: &'a str, next: Option<&'a str>) -> Option<Line<'a>> {
    match line.split_once(':') {
        Some((key, value)) => {
            let value = match (value.trim(), next) {
                ("", Some(next)) => next.trim(),
                (value, _) => value,
            };
            Some(Line::Field {
                key: key.trim(),
                value,
            })
        }
        None if next.is_none() => Some(Line::Unlabeled(line.trim())),
        None => None,
    }
}

#[derive(Default)]
struct Fields {
    id: Option<String>,
    event: Option<String>,
    data: Option<String>,
    retry: Option<String>,
}

impl Fields {
    fn append(&mut self, key: &str, value: &str) {
        let slot = match key {
            "id" => &mut self.id,
            "event" => &mut self.event,
            "data" => &mut self.data,
            "retry" => &mut self.retry,
            _ => return,
        };

        match slot {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => *slot = Some(value.to_owned()),
        }
    }

    fn into_event(self) -> ServerSentEvent {
        ServerSentEvent {
            id: self.id,
            event: self.event,
            data: self.data,
            retry: self.retry.and_then(|raw| raw.trim().parse().ok()),
        }
    }
}
