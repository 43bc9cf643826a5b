//! Raw chain payload -> `NormalizedEvent`.
//!
//! Raw payloads vary by source (listener, JSON-RPC replay, manual input), so
//! they arrive as untyped JSON and are validated exactly once here. Later
//! stages only ever see the canonical struct.

use chainwatch_domain::{
    canonical_address, validate_address, AddressFormatError, DecodedParam, EventKey,
    NormalizedEvent,
};
use serde_json::{Map, Value};
use thiserror::Error;

/// Length of one ABI word in hex characters.
const WORD_HEX_LEN: usize = 64;
/// Length of a function selector in hex characters.
const SELECTOR_HEX_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AbiKind {
    Address,
    Uint256,
}

impl AbiKind {
    fn as_str(self) -> &'static str {
        match self {
            AbiKind::Address => "address",
            AbiKind::Uint256 => "uint256",
        }
    }
}

struct KnownMethod {
    selector: &'static str,
    name: &'static str,
    params: &'static [(&'static str, AbiKind)],
}

const KNOWN_METHODS: [KnownMethod; 3] = [
    KnownMethod {
        selector: "0xa9059cbb",
        name: "transfer",
        params: &[("to", AbiKind::Address), ("amount", AbiKind::Uint256)],
    },
    KnownMethod {
        selector: "0x23b872dd",
        name: "transferFrom",
        params: &[
            ("from", AbiKind::Address),
            ("to", AbiKind::Address),
            ("amount", AbiKind::Uint256),
        ],
    },
    KnownMethod {
        selector: "0x095ea7b3",
        name: "approve",
        params: &[("spender", AbiKind::Address), ("amount", AbiKind::Uint256)],
    },
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid event data")]
    InvalidEvent,
    #[error("Missing required fields: {0}")]
    MissingFields(String),
    #[error("Invalid address format in `{field}`: {source}")]
    InvalidAddress {
        field: &'static str,
        #[source]
        source: AddressFormatError,
    },
    #[error("Invalid value format: {0}")]
    InvalidValue(String),
    #[error("Invalid transaction hash: {0}")]
    InvalidHash(String),
}

/// Stateless converter from raw payloads to canonical events.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventNormalizer;

impl EventNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Validates and canonicalizes `raw`. Pure: the same input always yields
    /// the same event, and the wall clock is never consulted.
    pub fn normalize(&self, chain_id: u64, raw: &Value) -> Result<NormalizedEvent, ValidationError> {
        let object = match raw {
            Value::Object(map) if !map.is_empty() => map,
            _ => return Err(ValidationError::InvalidEvent),
        };

        let hash = raw_hash(object);
        let from = non_empty_str(object, "from");
        let value = object.get("value").filter(|v| !v.is_null());

        let (Some(hash), Some(from), Some(value)) = (hash, from, value) else {
            let mut missing = Vec::new();
            if hash.is_none() {
                missing.push("hash");
            }
            if from.is_none() {
                missing.push("from");
            }
            if value.is_none() {
                missing.push("value");
            }
            return Err(ValidationError::MissingFields(missing.join(", ")));
        };

        let hash = checked_hash(hash)?;
        let from = checked_address("from", from)?;
        let to = match object.get("to") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(checked_address("to", s)?),
            Some(_) => {
                return Err(ValidationError::InvalidAddress {
                    field: "to",
                    source: AddressFormatError::MissingPrefix,
                })
            }
        };

        let value = canonical_value(value)?;
        let timestamp = quantity(object.get("timestamp"))
            .and_then(|ts| i64::try_from(ts).ok())
            .unwrap_or(0);
        let block_number = quantity(object.get("blockNumber")).unwrap_or(0);

        let input = object
            .get("input")
            .or_else(|| object.get("data"))
            .and_then(Value::as_str)
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty());
        let decoded = input.as_deref().and_then(decode_call);

        let is_batch_operation = object
            .get("batchOperation")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let (method_id, method_name, parameters) = match decoded {
            Some(call) => (
                Some(call.selector.to_string()),
                Some(call.name.to_string()),
                Some(call.params),
            ),
            None => (None, None, None),
        };

        Ok(NormalizedEvent {
            chain_id,
            transaction_hash: hash,
            from,
            is_contract_creation: to.is_none(),
            to,
            value,
            timestamp,
            block_number,
            method_id,
            method_name,
            parameters,
            input,
            is_batch_operation,
        })
    }
}

/// Identity of a raw payload, derived the same way `normalize` derives the
/// event's hash. `None` when the payload has no usable hash.
pub fn raw_event_key(chain_id: u64, raw: &Value) -> Option<EventKey> {
    let hash = raw.as_object().and_then(raw_hash)?;
    checked_hash(hash).ok().map(|transaction_hash| EventKey {
        chain_id,
        transaction_hash,
    })
}

// `transactionHash` is what receipts and log payloads call it.
fn raw_hash(object: &Map<String, Value>) -> Option<&str> {
    non_empty_str(object, "hash").or_else(|| non_empty_str(object, "transactionHash"))
}

/// Lower-cases the hash and requires `0x` followed by hex digits.
fn checked_hash(raw: &str) -> Result<String, ValidationError> {
    let hash = raw.trim().to_ascii_lowercase();
    let is_hex = hash
        .strip_prefix("0x")
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_hexdigit()));
    if is_hex {
        Ok(hash)
    } else {
        Err(ValidationError::InvalidHash(raw.to_string()))
    }
}

fn non_empty_str<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn checked_address(field: &'static str, raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    validate_address(trimmed).map_err(|source| ValidationError::InvalidAddress { field, source })?;
    Ok(canonical_address(trimmed))
}

/// Accepts a base-10 digit string or a non-negative JSON integer and strips
/// leading zeros.
fn canonical_value(raw: &Value) -> Result<String, ValidationError> {
    let digits = match raw {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => match n.as_u64() {
            Some(v) => v.to_string(),
            None => return Err(ValidationError::InvalidValue(n.to_string())),
        },
        other => return Err(ValidationError::InvalidValue(other.to_string())),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::InvalidValue(digits));
    }

    let stripped = digits.trim_start_matches('0');
    Ok(if stripped.is_empty() {
        "0".to_string()
    } else {
        stripped.to_string()
    })
}

/// Reads an integer that may be a JSON number, a decimal string or a `0x`
/// hex quantity. Anything else is treated as unknown.
fn quantity(raw: Option<&Value>) -> Option<u64> {
    match raw? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        _ => None,
    }
}

struct DecodedCall {
    selector: &'static str,
    name: &'static str,
    params: Vec<DecodedParam>,
}

fn decode_call(input: &str) -> Option<DecodedCall> {
    let body = input.strip_prefix("0x")?;
    if body.len() < SELECTOR_HEX_LEN || !body.is_char_boundary(SELECTOR_HEX_LEN) {
        return None;
    }
    let (selector, args) = body.split_at(SELECTOR_HEX_LEN);
    let method = KNOWN_METHODS
        .iter()
        .find(|m| m.selector[2..] == *selector)?;

    if args.len() != method.params.len() * WORD_HEX_LEN
        || !args.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return None;
    }

    let params = method
        .params
        .iter()
        .enumerate()
        .map(|(index, (name, kind))| {
            let word = &args[index * WORD_HEX_LEN..(index + 1) * WORD_HEX_LEN];
            let value = match kind {
                AbiKind::Address => format!("0x{}", &word[WORD_HEX_LEN - 40..]),
                AbiKind::Uint256 => hex_to_decimal(word)?,
            };
            Some(DecodedParam {
                name: name.to_string(),
                kind: kind.as_str().to_string(),
                value,
            })
        })
        .collect::<Option<Vec<_>>>()?;

    Some(DecodedCall {
        selector: method.selector,
        name: method.name,
        params,
    })
}

/// Converts an arbitrary-width hex quantity (with or without `0x`) into a
/// base-10 string.
pub fn hex_to_decimal(hex_digits: &str) -> Option<String> {
    let digits = hex_digits
        .strip_prefix("0x")
        .or_else(|| hex_digits.strip_prefix("0X"))
        .unwrap_or(hex_digits);
    if digits.is_empty() {
        return None;
    }
    let padded = if digits.len() % 2 == 1 {
        format!("0{digits}")
    } else {
        digits.to_string()
    };
    let mut bytes = hex::decode(padded).ok()?;

    // Repeated division by 10 over the big-endian byte string.
    let mut out = Vec::new();
    while bytes.iter().any(|b| *b != 0) {
        let mut remainder = 0u32;
        for byte in bytes.iter_mut() {
            let acc = (remainder << 8) | u32::from(*byte);
            *byte = (acc / 10) as u8;
            remainder = acc % 10;
        }
        out.push(b'0' + remainder as u8);
    }

    if out.is_empty() {
        return Some("0".to_string());
    }
    out.reverse();
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FROM: &str = "0xAbCdEf0123456789abcdef0123456789ABCDEF01";
    const TO: &str = "0x1111111111111111111111111111111111111111";

    fn raw() -> Value {
        json!({
            "hash": "0xABCDEF",
            "from": FROM,
            "to": TO,
            "value": "0001000",
            "timestamp": 1_700_000_000,
            "blockNumber": "0x10",
        })
    }

    #[test]
    fn normalizes_and_lowercases() {
        let event = EventNormalizer::new().normalize(1, &raw()).unwrap();
        assert_eq!(event.from, FROM.to_ascii_lowercase());
        assert_eq!(event.to.as_deref(), Some(TO));
        assert_eq!(event.value, "1000");
        assert_eq!(event.transaction_hash, "0xabcdef");
        assert_eq!(event.block_number, 16);
        assert_eq!(event.timestamp, 1_700_000_000);
        assert!(!event.is_contract_creation);
    }

    #[test]
    fn normalization_is_idempotent() {
        let normalizer = EventNormalizer::new();
        let first = normalizer.normalize(56, &raw()).unwrap();
        let second = normalizer.normalize(56, &raw()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_empty_and_missing_fields() {
        let normalizer = EventNormalizer::new();
        assert_eq!(
            normalizer.normalize(1, &Value::Null).unwrap_err(),
            ValidationError::InvalidEvent
        );
        assert_eq!(
            normalizer.normalize(1, &json!({})).unwrap_err(),
            ValidationError::InvalidEvent
        );
        let err = normalizer
            .normalize(1, &json!({"from": FROM}))
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingFields("hash, value".into()));
    }

    #[test]
    fn accepts_transaction_hash_alias_and_numeric_value() {
        let event = EventNormalizer::new()
            .normalize(1, &json!({"transactionHash": "0x1", "from": FROM, "value": 42}))
            .unwrap();
        assert_eq!(event.transaction_hash, "0x1");
        assert_eq!(event.value, "42");
        assert_eq!(event.timestamp, 0);
        assert_eq!(event.block_number, 0);
    }

    #[test]
    fn rejects_bad_addresses_and_values() {
        let normalizer = EventNormalizer::new();
        let mut bad_from = raw();
        bad_from["from"] = json!("0x1234");
        assert!(matches!(
            normalizer.normalize(1, &bad_from).unwrap_err(),
            ValidationError::InvalidAddress { field: "from", .. }
        ));

        for value in [json!("-5"), json!("1.5"), json!("0x10"), json!(-1), json!(true)] {
            let mut bad_value = raw();
            bad_value["value"] = value;
            assert!(matches!(
                normalizer.normalize(1, &bad_value).unwrap_err(),
                ValidationError::InvalidValue(_)
            ));
        }
    }

    #[test]
    fn rejects_hashes_that_are_not_prefixed_hex() {
        let normalizer = EventNormalizer::new();
        for hash in ["abcdef", "0x", "0xnothex", "0x12 34"] {
            let mut bad_hash = raw();
            bad_hash["hash"] = json!(hash);
            assert_eq!(
                normalizer.normalize(1, &bad_hash).unwrap_err(),
                ValidationError::InvalidHash(hash.to_string()),
                "accepted {hash}"
            );
        }
    }

    #[test]
    fn raw_key_matches_normalized_key() {
        let event = EventNormalizer::new().normalize(56, &raw()).unwrap();
        assert_eq!(raw_event_key(56, &raw()), Some(event.key()));
        assert_eq!(
            raw_event_key(1, &json!({"transactionHash": " 0xAB "})),
            Some(EventKey {
                chain_id: 1,
                transaction_hash: "0xab".into()
            })
        );
        assert_eq!(raw_event_key(1, &json!({"hash": "nope"})), None);
        assert_eq!(raw_event_key(1, &json!(["0xab"])), None);
    }

    #[test]
    fn missing_to_marks_contract_creation() {
        let mut creation = raw();
        creation["to"] = Value::Null;
        let event = EventNormalizer::new().normalize(1, &creation).unwrap();
        assert!(event.is_contract_creation);
        assert!(event.to.is_none());
    }

    #[test]
    fn decodes_known_selector() {
        let mut call = raw();
        call["input"] = json!(format!(
            "0xA9059CBB{:0>64}{:0>64x}",
            &TO[2..],
            1_000_000u64
        ));
        let event = EventNormalizer::new().normalize(1, &call).unwrap();
        assert_eq!(event.method_id.as_deref(), Some("0xa9059cbb"));
        assert_eq!(event.method_name.as_deref(), Some("transfer"));
        let params = event.parameters.expect("decoded parameters");
        assert_eq!(params[0].value, TO);
        assert_eq!(params[1].kind, "uint256");
        assert_eq!(params[1].value, "1000000");
    }

    #[test]
    fn malformed_input_leaves_method_fields_absent() {
        let normalizer = EventNormalizer::new();
        for input in ["0xa9059cbb1234", "0xdeadbeef", "0xzz", "0x"] {
            let mut call = raw();
            call["input"] = json!(input);
            let event = normalizer.normalize(1, &call).unwrap();
            assert!(event.method_id.is_none(), "decoded {input}");
            assert!(event.parameters.is_none());
        }
    }

    #[test]
    fn converts_wide_hex_quantities() {
        assert_eq!(hex_to_decimal("0x0").as_deref(), Some("0"));
        assert_eq!(hex_to_decimal("0xde0b6b3a7640000").as_deref(), Some("1000000000000000000"));
        assert_eq!(
            hex_to_decimal(&"f".repeat(64)).as_deref(),
            Some("115792089237316195423570985008687907853269984665640564039457584007913129639935")
        );
        assert!(hex_to_decimal("0xnothex").is_none());
    }
}
