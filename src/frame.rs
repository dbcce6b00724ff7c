//! Frame codec: the wire is UTF-8 JSON arrays whose first element is a verb
//! (`REQ`, `EVENT`, `CLOSE`, `COUNT`, `AUTH`, `EOSE`, `CLOSED`, `OK`,
//! `NOTICE`), per the relay protocol's message framing. The wire is
//! positional rather than object-tagged, so encode/decode is hand-rolled
//! here in a free-function-plus-enum style.

use serde_json::{json, Value};

use crate::error::RelayError;
use crate::event::Event;
use crate::filter::Filter;
use crate::ids::{CorrelationId, EventId};

/// A frame the client sends to a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Req {
        sub_id: CorrelationId,
        filters: Vec<Filter>,
    },
    Close {
        sub_id: CorrelationId,
    },
    Event {
        event: Event,
    },
    Count {
        req_id: CorrelationId,
        filters: Vec<Filter>,
    },
    Auth {
        event: Event,
    },
}

impl OutboundMessage {
    pub fn to_json(&self) -> Value {
        match self {
            OutboundMessage::Req { sub_id, filters } => {
                let mut array = vec![json!("REQ"), json!(sub_id.0)];
                array.extend(filters.iter().map(|f| serde_json::to_value(f).unwrap()));
                Value::Array(array)
            },
            OutboundMessage::Close { sub_id } => json!(["CLOSE", sub_id.0]),
            OutboundMessage::Event { event } => json!(["EVENT", event]),
            OutboundMessage::Count { req_id, filters } => {
                let mut array = vec![json!("COUNT"), json!(req_id.0)];
                array.extend(filters.iter().map(|f| serde_json::to_value(f).unwrap()));
                Value::Array(array)
            },
            OutboundMessage::Auth { event } => json!(["AUTH", event]),
        }
    }

    pub fn to_string(&self) -> String {
        self.to_json().to_string()
    }
}

/// A frame received from a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Event {
        sub_id: CorrelationId,
        event: Event,
    },
    Eose {
        sub_id: CorrelationId,
    },
    Closed {
        sub_id: CorrelationId,
        reason: String,
    },
    Ok {
        event_id: EventId,
        accepted: bool,
        reason: String,
    },
    Notice {
        text: String,
    },
    Auth {
        challenge: String,
    },
    Count {
        req_id: CorrelationId,
        count: u64,
    },
}

/// Parse one inbound wire message. Parsing fails with `MalformedFrame` on a
/// non-array, empty-array, or unknown verb; such frames are never fatal —
/// the caller is expected to log the `Err` and move on, not tear down the
/// connection.
pub fn parse(text: &str) -> Result<InboundMessage, RelayError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| RelayError::MalformedFrame(format!("invalid json: {e}")))?;
    let array = value
        .as_array()
        .ok_or_else(|| RelayError::MalformedFrame("frame is not a json array".into()))?;
    let verb = array
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::MalformedFrame("missing or non-string verb".into()))?;

    let get_str = |idx: usize, what: &str| -> Result<String, RelayError> {
        array
            .get(idx)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RelayError::MalformedFrame(format!("missing {what}")))
    };

    match verb {
        "EVENT" => {
            if array.len() != 3 {
                return Err(RelayError::MalformedFrame(
                    "EVENT delivery needs sub-id and event".into(),
                ));
            }
            let sub_id = CorrelationId(get_str(1, "sub-id")?);
            let event: Event = serde_json::from_value(array[2].clone())
                .map_err(|e| RelayError::MalformedFrame(format!("invalid event payload: {e}")))?;
            Ok(InboundMessage::Event { sub_id, event })
        },
        "EOSE" => Ok(InboundMessage::Eose {
            sub_id: CorrelationId(get_str(1, "sub-id")?),
        }),
        "CLOSED" => Ok(InboundMessage::Closed {
            sub_id: CorrelationId(get_str(1, "sub-id")?),
            reason: get_str(2, "reason").unwrap_or_default(),
        }),
        "OK" => {
            if array.len() != 4 {
                return Err(RelayError::MalformedFrame("OK needs 4 elements".into()));
            }
            let event_id = EventId(get_str(1, "event-id")?);
            let accepted = array
                .get(2)
                .and_then(Value::as_bool)
                .ok_or_else(|| RelayError::MalformedFrame("OK accepted flag not a bool".into()))?;
            let reason = get_str(3, "reason").unwrap_or_default();
            Ok(InboundMessage::Ok {
                event_id,
                accepted,
                reason,
            })
        },
        "NOTICE" => Ok(InboundMessage::Notice {
            text: get_str(1, "text")?,
        }),
        "AUTH" => Ok(InboundMessage::Auth {
            challenge: get_str(1, "challenge")?,
        }),
        "COUNT" => {
            let req_id = CorrelationId(get_str(1, "req-id")?);
            let count = array
                .get(2)
                .and_then(|v| v.get("count"))
                .and_then(Value::as_u64)
                .ok_or_else(|| RelayError::MalformedFrame("COUNT missing count field".into()))?;
            Ok(InboundMessage::Count { req_id, count })
        },
        other => Err(RelayError::MalformedFrame(format!("unknown verb: {other}"))),
    }
}

#[cfg(test)]
mod test {
    use test_log::test;
    use super::*;
    use crate::ids::PubKey;

    fn sample_event() -> Event {
        Event {
            id: EventId("e1".into()),
            pubkey: PubKey("p1".into()),
            created_at: 1,
            kind: 1,
            tags: vec![],
            content: "hi".into(),
            sig: "sig1".into(),
        }
    }

    #[test]
    fn round_trips_req_with_two_filters() {
        let f1 = Filter::kinds(vec![1]);
        let f2 = Filter::kinds(vec![2]);
        let encoded = OutboundMessage::Req {
            sub_id: CorrelationId("s1".into()),
            filters: vec![f1.clone(), f2.clone()],
        }
        .to_string();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value[0], json!("REQ"));
        assert_eq!(value[1], json!("s1"));
        assert_eq!(value[2], json!(f1));
        assert_eq!(value[3], json!(f2));
    }

    #[test]
    fn parses_event_delivery() {
        let text = json!(["EVENT", "s1", sample_event()]).to_string();
        match parse(&text).unwrap() {
            InboundMessage::Event { sub_id, event } => {
                assert_eq!(sub_id.0, "s1");
                assert_eq!(event.content, "hi");
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_ok() {
        let text = json!(["OK", "e1", true, "stored"]).to_string();
        match parse(&text).unwrap() {
            InboundMessage::Ok {
                event_id,
                accepted,
                reason,
            } => {
                assert_eq!(event_id.0, "e1");
                assert!(accepted);
                assert_eq!(reason, "stored");
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_count_reply() {
        let text = json!(["COUNT", "r1", {"count": 42}]).to_string();
        match parse(&text).unwrap() {
            InboundMessage::Count { req_id, count } => {
                assert_eq!(req_id.0, "r1");
                assert_eq!(count, 42);
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rejects_non_array() {
        assert!(parse(r#"{"not":"an array"}"#).is_err());
    }

    #[test]
    fn rejects_empty_array() {
        assert!(parse("[]").is_err());
    }

    #[test]
    fn rejects_unknown_verb() {
        assert!(parse(r#"["PING"]"#).is_err());
    }
}
