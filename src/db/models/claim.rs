use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Lifecycle state of a claim as reported by chainquery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BidState {
    Controlling,
    Accepted,
    Active,
    Spent,
    Expired,
    Other(String),
}

impl BidState {
    pub fn as_str(&self) -> &str {
        match self {
            BidState::Controlling => "Controlling",
            BidState::Accepted => "Accepted",
            BidState::Active => "Active",
            BidState::Spent => "Spent",
            BidState::Expired => "Expired",
            BidState::Other(s) => s,
        }
    }

    /// Spent and expired claims must not be searchable.
    pub fn is_removed(&self) -> bool {
        matches!(self, BidState::Spent | BidState::Expired)
    }
}

impl Default for BidState {
    fn default() -> Self {
        BidState::Other(String::new())
    }
}

impl From<String> for BidState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Controlling" => BidState::Controlling,
            "Accepted" => BidState::Accepted,
            "Active" => BidState::Active,
            "Spent" => BidState::Spent,
            "Expired" => BidState::Expired,
            _ => BidState::Other(s),
        }
    }
}

impl From<&str> for BidState {
    fn from(s: &str) -> Self {
        BidState::from(s.to_string())
    }
}

impl From<BidState> for String {
    fn from(state: BidState) -> Self {
        state.as_str().to_string()
    }
}

/// Claim row exactly as chainquery returns it.
///
/// `value` is the `value_as_json` column: a JSON document serialized as a
/// string, with the claim itself nested under `Claim`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawClaimRow {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub bid_state: BidState,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub effective_amount: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub certificate_amount: u64,
    #[serde(rename = "claimId", default, deserialize_with = "null_as_default")]
    pub claim_id: String,
    #[serde(default)]
    pub value: Option<Value>,
}

/// Claim row with its metadata payload decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimRow {
    pub id: u64,
    pub name: String,
    pub channel: Option<String>,
    pub channel_id: Option<String>,
    pub bid_state: BidState,
    pub effective_amount: u64,
    pub certificate_amount: u64,
    pub claim_id: String,
    /// Decoded claim metadata. `None` when the row had no value or the value
    /// could not be decoded.
    pub value: Option<Value>,
}

#[derive(Debug, Error)]
pub enum ValueDecodeError {
    #[error("value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("value has no Claim object")]
    MissingClaim,

    #[error("value is neither a JSON string nor an object")]
    UnexpectedShape,
}

/// Unwrap the doubly encoded `value_as_json` payload into the inner claim.
///
/// `Ok(None)` means the row simply has no value.
pub fn decode_claim_value(raw: Option<Value>) -> Result<Option<Value>, ValueDecodeError> {
    let outer = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => serde_json::from_str::<Value>(&s)?,
        Some(obj @ Value::Object(_)) => obj,
        Some(_) => return Err(ValueDecodeError::UnexpectedShape),
    };

    match outer {
        Value::Object(mut map) => match map.remove("Claim") {
            Some(Value::Null) | None => Err(ValueDecodeError::MissingClaim),
            Some(claim) => Ok(Some(claim)),
        },
        Value::Null => Ok(None),
        _ => Err(ValueDecodeError::UnexpectedShape),
    }
}

impl RawClaimRow {
    /// Decode the payload. A bad payload is logged and leaves `value` empty so
    /// the rest of the batch keeps going.
    pub fn decode(self) -> ClaimRow {
        let value = match decode_claim_value(self.value) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "[FETCH] Failed to decode value of claim {} (id {}): {}",
                    self.claim_id, self.id, e
                );
                None
            },
        };

        ClaimRow {
            id: self.id,
            name: self.name.unwrap_or_default(),
            channel: self.channel,
            channel_id: self.channel_id,
            bid_state: self.bid_state,
            effective_amount: self.effective_amount,
            certificate_amount: self.certificate_amount,
            claim_id: self.claim_id,
            value,
        }
    }
}

impl ClaimRow {
    /// Build a row from one element of a chainquery `data` array.
    ///
    /// A row that does not match the expected schema is kept with no value,
    /// so it still advances the cursor and counts toward the batch. Only a
    /// row without a readable `id` is dropped.
    pub fn from_json(row: Value) -> Option<ClaimRow> {
        let id = row.get("id").and_then(json_u64);
        let claim_id = row
            .get("claimId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match serde_json::from_value::<RawClaimRow>(row) {
            Ok(raw) => Some(raw.decode()),
            Err(e) => {
                let Some(id) = id else {
                    warn!("[FETCH] Dropping claim row without a readable id: {}", e);
                    return None;
                };
                warn!(
                    "[FETCH] Claim {} (id {}) does not match the claim schema: {}",
                    claim_id, id, e
                );
                Some(ClaimRow {
                    id,
                    name: String::new(),
                    channel: None,
                    channel_id: None,
                    bid_state: BidState::default(),
                    effective_amount: 0,
                    certificate_amount: 0,
                    claim_id,
                    value: None,
                })
            },
        }
    }
}

fn json_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Amount columns come back as numbers, numeric strings or null depending on
/// the backend and column type.
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| serde::de::Error::custom(format!("invalid amount {n}"))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid amount '{s}'"))),
        Some(other) => Err(serde::de::Error::custom(format!("invalid amount {other}"))),
    }
}
