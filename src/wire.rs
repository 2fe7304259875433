// 📦 Wire types - outbound form payloads and inbound `response` bodies
//
// Pin accepts form-encoded parameters and answers with JSON shaped as
//   {"response": {...}}                       on success
//   {"error": ..., "error_description": ...}  on failure

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

// ============================================================================
// OUTBOUND PAYLOAD
// ============================================================================

/// Ordered form/query parameters. `None` values are left out entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    fields: Vec<(String, String)>,
}

impl Payload {
    pub fn new() -> Self {
        Payload::default()
    }

    pub fn field(mut self, key: &str, value: impl ToString) -> Self {
        self.fields.push((key.to_string(), value.to_string()));
        self
    }

    pub fn optional_field<V: ToString>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.field(key, v),
            None => self,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.fields
    }

}

// ============================================================================
// ERROR BODY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorMessage {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub param: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorResponse {
    #[serde(deserialize_with = "string_or_number")]
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub messages: Vec<ErrorMessage>,
    #[serde(default)]
    pub charge_token: Option<String>,
}

impl ErrorResponse {
    /// Decode an error body. Fields that do not fit are skipped one by one,
    /// so an odd `messages` entry never loses `error_description` or
    /// `charge_token`.
    pub fn from_value(value: &Value) -> Self {
        if let Ok(parsed) = serde_json::from_value::<ErrorResponse>(value.clone()) {
            return parsed;
        }

        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);

        let error = match value.get("error") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        let messages = value
            .get("messages")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|m| ErrorMessage {
                        code: m.get("code").map(|c| c.as_str().map(str::to_string).unwrap_or_else(|| c.to_string())),
                        message: m.get("message").and_then(Value::as_str).map(str::to_string),
                        param: m.get("param").and_then(Value::as_str).map(str::to_string),
                    })
                    .collect()
            })
            .unwrap_or_default();

        ErrorResponse {
            error,
            error_description: text("error_description"),
            messages,
            charge_token: text("charge_token"),
        }
    }

    /// Most specific human-readable message the gateway gave us
    pub fn message(&self) -> String {
        self.messages
            .first()
            .and_then(|m| m.message.clone())
            .or_else(|| self.error_description.clone())
            .unwrap_or_else(|| self.error.clone())
    }
}

// ============================================================================
// SUCCESS BODIES (contents of "response")
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CardData {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default)]
    pub display_number: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub expiry_month: Option<u32>,
    #[serde(default)]
    pub expiry_year: Option<i32>,
    #[serde(default)]
    pub address_line1: Option<String>,
    #[serde(default)]
    pub address_line2: Option<String>,
    #[serde(default)]
    pub address_city: Option<String>,
    #[serde(default)]
    pub address_state: Option<String>,
    #[serde(default)]
    pub address_postcode: Option<String>,
    #[serde(default)]
    pub address_country: Option<String>,
    #[serde(default)]
    pub primary: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChargeData {
    pub token: String,
    #[serde(default, deserialize_with = "lenient")]
    pub success: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub total_fees: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub status_message: Option<String>,
    /// Snapshot only: a null or odd-shaped card never hides an accepted charge
    #[serde(default, deserialize_with = "lenient")]
    pub card: Option<CardData>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CustomerData {
    pub token: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub card: Option<CardData>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BankAccountData {
    pub token: String,
    #[serde(default)]
    pub bank_name: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub bsb: String,
    #[serde(deserialize_with = "string_or_number")]
    pub number: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecipientData {
    pub token: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    pub bank_account: BankAccountData,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransferData {
    pub token: String,
    #[serde(default)]
    pub status: Option<String>,
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
    pub amount: i64,
}

/// `pagination` block that accompanies list responses
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub current: Option<u32>,
    #[serde(default)]
    pub next: Option<u32>,
    #[serde(default)]
    pub pages: Option<u32>,
}

impl Pagination {
    /// Pagination of a raw list body. `None` for bodies without one.
    pub fn from_body(body: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(body).ok()?;
        serde_json::from_value(value.get("pagination")?.clone()).ok()
    }
}

/// Decode `T` when the value fits, `None` otherwise (null and wrong shapes alike)
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Pin sometimes returns numeric-looking fields (BSB, account numbers) as
/// JSON numbers. Keep them as text so leading zeros survive.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_skips_missing_values() {
        let payload = Payload::new()
            .field("amount", 1999)
            .optional_field("description", None::<String>)
            .optional_field("email", Some("a@b.com"));

        assert_eq!(payload.pairs().len(), 2);
        assert_eq!(payload.get("amount"), Some("1999"));
        assert_eq!(payload.get("description"), None);
        assert_eq!(payload.get("email"), Some("a@b.com"));
    }

    #[test]
    fn test_error_message_preference() {
        let with_messages: ErrorResponse = serde_json::from_value(json!({
            "error": "invalid_resource",
            "error_description": "One or more parameters were missing or invalid",
            "messages": [{"code": "card_number_invalid", "message": "Card number is invalid", "param": "number"}]
        }))
        .unwrap();
        assert_eq!(with_messages.message(), "Card number is invalid");

        let description_only: ErrorResponse = serde_json::from_value(json!({
            "error": "x",
            "error_description": "bad card"
        }))
        .unwrap();
        assert_eq!(description_only.message(), "bad card");

        let bare: ErrorResponse = serde_json::from_value(json!({"error": "not_found"})).unwrap();
        assert_eq!(bare.message(), "not_found");
    }

    #[test]
    fn test_error_body_with_odd_fields_keeps_the_rest() {
        let error = ErrorResponse::from_value(&json!({
            "error": "card_declined",
            "error_description": "The card was declined",
            "charge_token": "ch_declined",
            "messages": [{"code": 51, "message": "Insufficient funds"}]
        }));

        assert_eq!(error.error, "card_declined");
        assert_eq!(error.charge_token.as_deref(), Some("ch_declined"));
        assert_eq!(error.error_description.as_deref(), Some("The card was declined"));
        assert_eq!(error.messages[0].code.as_deref(), Some("51"));
        assert_eq!(error.message(), "Insufficient funds");

        let odd_error = ErrorResponse::from_value(&json!({
            "error": {"kind": "x"},
            "error_description": "bad card",
            "messages": "not a list"
        }));
        assert_eq!(odd_error.message(), "bad card");
        assert!(odd_error.messages.is_empty());
    }

    #[test]
    fn test_pagination_from_list_body() {
        let body = json!({
            "response": [],
            "count": 30,
            "pagination": {"current": 1, "previous": null, "next": 2, "per_page": 25, "pages": 2, "count": 30}
        })
        .to_string();

        let pagination = Pagination::from_body(&body).unwrap();
        assert_eq!(pagination.next, Some(2));
        assert_eq!(pagination.pages, Some(2));

        assert_eq!(Pagination::from_body(r#"{"response": []}"#), None);
        assert_eq!(Pagination::from_body("<html>"), None);
    }

    #[test]
    fn test_bank_account_numeric_fields_as_text() {
        let data: BankAccountData = serde_json::from_value(json!({
            "token": "ba_123",
            "bank_name": "ANZ",
            "branch": "Melbourne",
            "name": "Mr Roland Robot",
            "bsb": 123456,
            "number": "XXXXXX321"
        }))
        .unwrap();

        assert_eq!(data.bsb, "123456");
        assert_eq!(data.number, "XXXXXX321");
    }

    #[test]
    fn test_charge_data_tolerates_sparse_card() {
        let data: ChargeData = serde_json::from_value(json!({
            "token": "ch_abc",
            "total_fees": 42
        }))
        .unwrap();

        assert_eq!(data.total_fees, Some(42));
        assert_eq!(data.card, None);
    }
}
