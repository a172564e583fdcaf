//! Pagination codec
//!
//! A page token is `base64url("{self}:{payload}")`. `payload` is
//! `base64url(json)` holding the key attributes of the last item of the
//! page (`hash`, `range`, `indexValue`, `GSIH`, `GSIR`) and `self` is the
//! payload that produced the page, or `null` on the first page. The token
//! after the last page is the literal [`END_OF_LIST`].

use base64::Engine as _;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::core::Result;
use crate::schema::{EntitySchema, KeyShape};
use crate::store::Item;

pub const END_OF_LIST: &str = "END_OF_LIST";
pub const NULL_PAYLOAD: &str = "null";

const HASH: &str = "hash";
const RANGE: &str = "range";
const INDEX_VALUE: &str = "indexValue";
const GSI_HASH: &str = "GSIH";
const GSI_RANGE: &str = "GSIR";

fn encode(raw: &str) -> String {
    URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

fn decode(raw: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(raw.trim())
        .or_else(|_| URL_SAFE.decode(raw.trim()))
        .ok()?;
    String::from_utf8(bytes).ok()
}

/// `(self, payload)` parts of a token; `None` for `END_OF_LIST` and
/// anything that does not decode.
pub fn split_token(token: &str) -> Option<(String, String)> {
    if token.is_empty() || token == END_OF_LIST {
        return None;
    }
    let decoded = decode(token)?;
    let (self_part, payload) = decoded.split_once(':')?;
    Some((self_part.to_string(), payload.to_string()))
}

/// Payload part of an incoming token, `null` when there is none.
pub fn self_payload(token: Option<&str>) -> String {
    token
        .and_then(split_token)
        .map(|(_, payload)| payload)
        .unwrap_or_else(|| NULL_PAYLOAD.to_string())
}

/// Decode a token into the exclusive start key of the next store call.
/// `None` means "start from the first page".
pub fn create_page_token_map<E>(
    schema: &EntitySchema<E>,
    token: Option<&str>,
    shape: &KeyShape,
) -> Result<Option<Item>> {
    let Some((_, payload)) = token.and_then(split_token) else {
        return Ok(None);
    };
    if payload == NULL_PAYLOAD {
        return Ok(None);
    }
    let Some(json) = decode(&payload).and_then(|raw| serde_json::from_str::<Map<String, JsonValue>>(&raw).ok())
    else {
        debug!("Discarding undecodable page token payload");
        return Ok(None);
    };

    let mut targets: Vec<(&str, &str)> = vec![(HASH, schema.hash_key())];
    if let Some(range) = schema.range_key() {
        targets.push((RANGE, range));
    }
    if let Some(range_field) = shape.range_field.as_deref() {
        if shape.global {
            targets.push((GSI_HASH, shape.hash_field.as_str()));
            targets.push((GSI_RANGE, range_field));
        } else if shape.index_name.is_some() {
            targets.push((INDEX_VALUE, range_field));
        }
    }

    let mut item = Item::new();
    for (slot, field) in targets {
        let Some(raw) = json.get(slot).filter(|v| !v.is_null()) else {
            continue;
        };
        match schema.field_type(field)?.coerce_json(raw) {
            Ok(value) => {
                item.insert(field.to_string(), value);
            }
            Err(e) => {
                debug!("Discarding page token: slot '{}' does not fit field '{}': {}", slot, field, e);
                return Ok(None);
            }
        }
    }

    Ok(if item.is_empty() { None } else { Some(item) })
}

/// Token addressing the page after `last_item`.
pub fn create_new_page_token<E>(
    schema: &EntitySchema<E>,
    last_item: &Item,
    shape: &KeyShape,
    incoming: Option<&str>,
) -> String {
    let attribute = |field: &str| last_item.get(field).filter(|v| !v.is_null()).map(|v| v.to_json());

    let mut json = Map::new();
    let mut put = |slot: &str, value: Option<JsonValue>| {
        if let Some(value) = value {
            json.insert(slot.to_string(), value);
        }
    };

    put(HASH, attribute(schema.hash_key()));
    put(RANGE, schema.range_key().and_then(attribute));
    if let Some(range_field) = shape.range_field.as_deref() {
        if shape.global {
            put(GSI_HASH, attribute(&shape.hash_field));
            put(GSI_RANGE, attribute(range_field));
        } else if shape.index_name.is_some() {
            put(INDEX_VALUE, attribute(range_field));
        }
    }

    let payload = encode(&JsonValue::Object(json).to_string());
    encode(&format!("{}:{}", self_payload(incoming), payload))
}

/// `self`, `next` and `previous` tokens of a returned page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageTokens {
    #[serde(rename = "self")]
    pub self_token: String,
    pub next: String,
    pub previous: Option<String>,
}

impl PageTokens {
    pub fn new(incoming: Option<&str>, next: Option<String>) -> Self {
        let self_token = self_payload(incoming);
        let previous = (self_token != NULL_PAYLOAD).then(|| encode(&format!("{}:{}", NULL_PAYLOAD, self_token)));
        Self {
            self_token,
            next: next.unwrap_or_else(|| END_OF_LIST.to_string()),
            previous,
        }
    }

    pub fn has_next(&self) -> bool {
        self.next != END_OF_LIST
    }
}

impl Default for PageTokens {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FieldType, Value};
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;

    #[derive(Debug, Clone, Default)]
    struct Event {
        feed: String,
        seq: i64,
        at: Option<DateTime<Utc>>,
        kind: String,
    }

    fn schema() -> EntitySchema<Event> {
        EntitySchema::builder("Event")
            .hash_key("feed")
            .range_key("seq")
            .field("feed", FieldType::Text, |e: &Event| Value::from(e.feed.clone()), |e, v| {
                e.feed = v.into_text()?;
                Ok(())
            })
            .field("seq", FieldType::Long, |e: &Event| Value::from(e.seq), |e, v| {
                e.seq = v.into_i64()?;
                Ok(())
            })
            .field("at", FieldType::Date, |e: &Event| Value::from(e.at), |e, v| {
                e.at = Some(v.into_date()?);
                Ok(())
            })
            .field("kind", FieldType::Text, |e: &Event| Value::from(e.kind.clone()), |e, v| {
                e.kind = v.into_text()?;
                Ok(())
            })
            .local_index("byAt", "at")
            .global_index("byKind", "kind", "seq")
            .build()
            .unwrap()
    }

    fn item(feed: &str, seq: i64, millis: i64, kind: &str) -> Item {
        let mut item = Item::new();
        item.insert("feed".into(), Value::from(feed));
        item.insert("seq".into(), Value::from(seq));
        item.insert("at".into(), Value::Date(Value::Integer(millis).as_date().unwrap()));
        item.insert("kind".into(), Value::from(kind));
        item
    }

    #[test]
    fn test_first_page_sentinels() {
        let schema = schema();
        let shape = schema.table_shape();
        assert_eq!(create_page_token_map(&schema, None, &shape).unwrap(), None);
        assert_eq!(create_page_token_map(&schema, Some(END_OF_LIST), &shape).unwrap(), None);
        assert_eq!(create_page_token_map(&schema, Some("%%%"), &shape).unwrap(), None);

        let tokens = PageTokens::new(None, None);
        assert_eq!(tokens.self_token, "null");
        assert_eq!(tokens.next, END_OF_LIST);
        assert!(tokens.previous.is_none());
    }

    #[test]
    fn test_mistyped_token_values_restart_from_first_page() {
        let schema = schema();
        let shape = schema.table_shape();
        let token = encode(&format!("null:{}", encode(r#"{"hash":"f","range":"abc"}"#)));
        assert_eq!(create_page_token_map(&schema, Some(&token), &shape).unwrap(), None);
    }

    #[test]
    fn test_token_chains_self_payload() {
        let schema = schema();
        let shape = schema.table_shape();
        let first = create_new_page_token(&schema, &item("f", 1, 0, "a"), &shape, None);
        let (self_part, payload) = split_token(&first).unwrap();
        assert_eq!(self_part, "null");

        let second = create_new_page_token(&schema, &item("f", 2, 0, "a"), &shape, Some(&first));
        let (self_part, _) = split_token(&second).unwrap();
        assert_eq!(self_part, payload);

        let tokens = PageTokens::new(Some(&second), None);
        assert_ne!(tokens.self_token, "null");
        assert_eq!(split_token(tokens.previous.as_deref().unwrap()).unwrap().1, tokens.self_token);
    }

    #[test]
    fn test_global_index_slots() {
        let schema = schema();
        let shape = schema.key_shape(Some("byKind")).unwrap();
        let token = create_new_page_token(&schema, &item("f", 3, 0, "click"), &shape, None);
        let start = create_page_token_map(&schema, Some(&token), &shape).unwrap().unwrap();
        assert_eq!(start["kind"], Value::from("click"));
        assert_eq!(start["seq"], Value::from(3));
        assert!(!start.contains_key("at"));
    }

    proptest! {
        #[test]
        fn prop_local_index_round_trip(feed in "[a-zA-Z0-9:/_-]{1,24}", seq in any::<i64>(), millis in 0i64..4_102_444_800_000) {
            let schema = schema();
            let shape = schema.key_shape(Some("byAt")).unwrap();
            let last = item(&feed, seq, millis, "k");

            let token = create_new_page_token(&schema, &last, &shape, None);
            let start = create_page_token_map(&schema, Some(&token), &shape).unwrap().unwrap();

            prop_assert_eq!(&start["feed"], &last["feed"]);
            prop_assert_eq!(&start["seq"], &last["seq"]);
            prop_assert_eq!(start["at"].as_i64(), Some(millis));
        }
    }
}
