//! Provider envelope → [`InboundEvent`] conversion.
//!
//! Accepted shapes, checked in order:
//! - a JSON array of any of the shapes below;
//! - the nested envelope `{ entry: [{ changes: [{ field, value }] }] }`;
//! - a bare change value `{ messages?, statuses?, contacts?, metadata? }`;
//! - a single flat status unit (`status` present) or message unit.
//!
//! Nothing here fails: units missing required fields are counted as
//! malformed, units of a kind we do not carry as unsupported, and payloads
//! with no recognizable shape as unrecognized.

use std::collections::HashMap;

use {
    chrono::{DateTime, Utc},
    courier_protocol::{Direction, MessageKind, MessageStatus, timestamp},
    serde_json::Value,
    tracing::debug,
};

use crate::{
    error::{Error, Result},
    event::{InboundEvent, NewMessageEvent, StatusEvent},
};

/// Events extracted from one payload plus per-reason drop counts.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NormalizeReport {
    pub events: Vec<InboundEvent>,
    pub malformed: u64,
    pub unsupported: u64,
    pub unrecognized: u64,
}

impl NormalizeReport {
    fn merge(&mut self, other: Self) {
        self.events.extend(other.events);
        self.malformed += other.malformed;
        self.unsupported += other.unsupported;
        self.unrecognized += other.unrecognized;
    }
}

/// `"User " + last 4 characters` of the counterparty id.
pub fn fallback_display_name(conversation_id: &str) -> String {
    let len = conversation_id.chars().count();
    let tail: String = conversation_id.chars().skip(len.saturating_sub(4)).collect();
    format!("User {tail}")
}

/// Normalize an arbitrary provider payload. `received_at` stands in for any
/// missing or unparseable provider timestamp.
pub fn normalize(payload: &Value, received_at: DateTime<Utc>) -> NormalizeReport {
    let mut report = NormalizeReport::default();

    match payload {
        Value::Array(items) => {
            for item in items {
                report.merge(normalize(item, received_at));
            }
        },
        Value::Object(obj) if obj.contains_key("entry") => {
            let Some(entries) = obj.get("entry").and_then(Value::as_array) else {
                report.unrecognized += 1;
                return report;
            };
            for change in entries
                .iter()
                .filter_map(|e| e.get("changes").and_then(Value::as_array))
                .flatten()
            {
                if let Some(field) = change.get("field").and_then(Value::as_str)
                    && field != "messages"
                {
                    debug!(field, "ignoring non-message change");
                    continue;
                }
                match change.get("value") {
                    Some(value @ Value::Object(_)) => {
                        report.merge(normalize_change_value(value, received_at));
                    },
                    _ => report.unrecognized += 1,
                }
            }
        },
        Value::Object(obj) if obj.contains_key("messages") || obj.contains_key("statuses") => {
            report.merge(normalize_change_value(payload, received_at));
        },
        Value::Object(obj) if obj.contains_key("status") && !obj.contains_key("text") => {
            report.merge(single(parse_status_unit(payload, received_at).map(Some)));
        },
        Value::Object(obj)
            if obj.contains_key("from") || obj.contains_key("text") || obj.contains_key("type") =>
        {
            let ctx = ChangeContext::default();
            report.merge(single(parse_message_unit(payload, &ctx, received_at)));
        },
        _ => {
            debug!("unrecognized payload shape");
            report.unrecognized += 1;
        },
    }

    report
}

/// Per-change context shared by the units inside it.
#[derive(Debug, Default)]
struct ChangeContext {
    /// `wa_id` → `profile.name`
    contacts: HashMap<String, String>,
    /// Business number the change was delivered to.
    default_to: Option<String>,
}

impl ChangeContext {
    fn from_value(value: &Value) -> Self {
        let contacts = value
            .get("contacts")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|c| {
                        let wa_id = str_field(c, &["wa_id"])?;
                        let name = c.get("profile").and_then(|p| str_field(p, &["name"]))?;
                        Some((wa_id.to_string(), name.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let default_to = value
            .get("metadata")
            .and_then(|m| str_field(m, &["display_phone_number", "phone_number_id"]))
            .map(str::to_string);
        Self {
            contacts,
            default_to,
        }
    }
}

fn normalize_change_value(value: &Value, received_at: DateTime<Utc>) -> NormalizeReport {
    let ctx = ChangeContext::from_value(value);
    let mut report = NormalizeReport::default();
    let messages = value.get("messages").and_then(Value::as_array);
    let statuses = value.get("statuses").and_then(Value::as_array);

    if messages.is_none() && statuses.is_none() {
        report.unrecognized += 1;
        return report;
    }

    for unit in messages.into_iter().flatten() {
        report.merge(single(parse_message_unit(unit, &ctx, received_at)));
    }
    for unit in statuses.into_iter().flatten() {
        report.merge(single(parse_status_unit(unit, received_at).map(Some)));
    }
    report
}

/// Fold one unit's parse result into a report.
fn single(result: Result<Option<InboundEvent>>) -> NormalizeReport {
    let mut report = NormalizeReport::default();
    match result {
        Ok(Some(event)) => report.events.push(event),
        Ok(None) => report.unsupported += 1,
        Err(e) => {
            debug!(error = %e, "dropping provider unit");
            report.malformed += 1;
        },
    }
    report
}

/// `Ok(None)` means the unit is well-formed but of an unsupported kind.
fn parse_message_unit(
    unit: &Value,
    ctx: &ChangeContext,
    received_at: DateTime<Utc>,
) -> Result<Option<InboundEvent>> {
    let id = non_empty(unit, &["id"]).ok_or_else(|| Error::malformed("message without id"))?;
    let from = non_empty(unit, &["from"])
        .ok_or_else(|| Error::malformed(format!("message {id} without sender")))?;

    let tag = str_field(unit, &["type"]).unwrap_or("text");
    let Some(kind) = MessageKind::from_provider(tag) else {
        debug!(message_id = id, kind = tag, "unsupported message kind");
        return Ok(None);
    };

    let body = match unit.get("text") {
        Some(Value::String(s)) => s.clone(),
        Some(text) => str_field(text, &["body"])
            .map(str::to_string)
            .ok_or_else(|| Error::malformed(format!("text message {id} without body")))?,
        None => return Err(Error::malformed(format!("text message {id} without body"))),
    };

    let display_name = str_field(unit, &["profileName", "profile_name"])
        .map(str::to_string)
        .or_else(|| ctx.contacts.get(from).cloned())
        .unwrap_or_else(|| fallback_display_name(from));

    let to = str_field(unit, &["to"])
        .map(str::to_string)
        .or_else(|| ctx.default_to.clone())
        .unwrap_or_default();

    Ok(Some(InboundEvent::NewMessage(NewMessageEvent {
        id: id.to_string(),
        correlation_id: correlation_of(unit),
        conversation_id: from.to_string(),
        from: from.to_string(),
        to,
        display_name: Some(display_name),
        direction: Direction::Inbound,
        kind,
        body,
        sent_at: timestamp_of(unit, received_at),
    })))
}

fn parse_status_unit(unit: &Value, received_at: DateTime<Utc>) -> Result<InboundEvent> {
    let correlation_id = correlation_of(unit);
    let id = non_empty(unit, &["id"])
        .map(str::to_string)
        .or_else(|| correlation_id.clone())
        .ok_or_else(|| Error::malformed("status without id or correlation id"))?;

    let raw = str_field(unit, &["status"])
        .ok_or_else(|| Error::malformed(format!("status for {id} without value")))?;
    let status: MessageStatus = raw
        .parse()
        .map_err(|e| Error::malformed(format!("status for {id}: {e}")))?;

    Ok(InboundEvent::Status(StatusEvent {
        id,
        correlation_id,
        status,
        timestamp: timestamp_of(unit, received_at),
        recipient_id: str_field(unit, &["recipient_id", "recipientId"]).map(str::to_string),
    }))
}

// ── Field helpers ────────────────────────────────────────────────────────────

/// First string value among `keys`.
fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| value.get(*k).and_then(Value::as_str))
}

fn non_empty<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    str_field(value, keys).map(str::trim).filter(|s| !s.is_empty())
}

fn correlation_of(unit: &Value) -> Option<String> {
    non_empty(unit, &["meta_msg_id", "correlationId", "correlation_id"]).map(str::to_string)
}

fn timestamp_of(unit: &Value, received_at: DateTime<Utc>) -> DateTime<Utc> {
    unit.get("timestamp")
        .and_then(timestamp::parse_value)
        .unwrap_or(received_at)
}
