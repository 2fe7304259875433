// 🧾 Pin Transaction - one charge attempt against the Pin Charges API
//
// Lifecycle:
//   Unprocessed ──process_transaction──▶ Processed(Succeeded | Failed)
//
// `processed` is write-once and is persisted BEFORE the network call, so a
// crash mid-call never leaves a re-submittable record. Gateway failures are
// recorded on the row (succeeded = false + message), never raised.

use crate::db::{self, Event};
use crate::entities::card::CardScheme;
use crate::entities::customer::ACTOR;
use crate::environment::EnvironmentResolver;
use crate::error::{PinError, Result};
use crate::gateway::{Gateway, GatewayReply, GatewayResponse, Transport};
use crate::wire::{ChargeData, Payload};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const DEFAULT_CURRENCY: &str = "AUD";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinTransaction {
    pub id: Option<i64>,
    /// When the row was first saved (not when Pin saw it)
    pub date: Option<DateTime<Utc>>,
    pub environment: String,
    /// Dollars; converted to cents only for the outbound payload
    pub amount: Decimal,
    /// Fees Pin charged for this transaction, in dollars
    pub fees: Decimal,
    pub description: Option<String>,
    pub processed: bool,
    pub succeeded: bool,
    pub currency: String,
    pub transaction_token: Option<String>,
    pub card_token: Option<String>,
    pub customer_id: Option<i64>,
    /// Short response text, usually "Success!"
    pub pin_response: Option<String>,
    pub ip_address: String,
    pub email_address: String,

    // Card snapshot copied from a successful charge
    pub card_address1: Option<String>,
    pub card_address2: Option<String>,
    pub card_city: Option<String>,
    pub card_state: Option<String>,
    pub card_postcode: Option<String>,
    pub card_country: Option<String>,
    pub card_number: Option<String>,
    pub card_type: Option<CardScheme>,

    /// Complete raw response body
    pub pin_response_text: Option<String>,
}

impl PinTransaction {
    pub fn new(amount: Decimal, email_address: &str, ip_address: &str) -> Self {
        PinTransaction {
            id: None,
            date: None,
            environment: String::new(),
            amount,
            fees: Decimal::new(0, 2),
            description: None,
            processed: false,
            succeeded: false,
            currency: DEFAULT_CURRENCY.to_string(),
            transaction_token: None,
            card_token: None,
            customer_id: None,
            pin_response: None,
            ip_address: ip_address.to_string(),
            email_address: email_address.to_string(),
            card_address1: None,
            card_address2: None,
            card_city: None,
            card_state: None,
            card_postcode: None,
            card_country: None,
            card_number: None,
            card_type: None,
            pin_response_text: None,
        }
    }

    pub fn with_card_token(mut self, card_token: &str) -> Self {
        self.card_token = Some(card_token.to_string());
        self
    }

    pub fn with_customer(mut self, customer_id: i64) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    fn has_card_token(&self) -> bool {
        self.card_token.as_deref().map_or(false, |t| !t.is_empty())
    }

    /// Save-time checks. Fills in the default environment and the date.
    pub fn validate(&mut self, resolver: &EnvironmentResolver) -> Result<()> {
        match (self.has_card_token(), self.customer_id.is_some()) {
            (false, false) => {
                return Err(PinError::Invalid(
                    "Must provide card_token or customer_token".to_string(),
                ))
            }
            (true, true) => {
                return Err(PinError::Invalid(
                    "Can only provide card_token OR customer_token, not both".to_string(),
                ))
            }
            _ => {}
        }

        if self.environment.is_empty() {
            self.environment = resolver.default_name().to_string();
        }

        if !resolver.contains(&self.environment) {
            return Err(PinError::Invalid(format!(
                "Pin Environment '{}' does not exist",
                self.environment
            )));
        }

        if self.date.is_none() {
            self.date = Some(Utc::now());
        }

        Ok(())
    }

    /// Validate, then insert or update. Nothing is written when validation fails.
    pub fn save(&mut self, conn: &Connection, resolver: &EnvironmentResolver) -> Result<i64> {
        self.validate(resolver)?;

        match self.id {
            Some(id) => {
                db::update_transaction(conn, id, self)?;
                Ok(id)
            }
            None => {
                let id = db::insert_transaction(conn, self)?;
                self.id = Some(id);
                Ok(id)
            }
        }
    }

    /// Amount in cents, truncated: 19.999 → 1999
    pub fn amount_in_cents(&self) -> Result<i64> {
        let out_of_range = || PinError::Invalid(format!("amount {} is out of range", self.amount));

        self.amount
            .checked_mul(Decimal::ONE_HUNDRED)
            .ok_or_else(out_of_range)?
            .trunc()
            .to_i64()
            .ok_or_else(out_of_range)
    }

    /// Form payload for POST /charges
    pub fn charge_payload(&self, customer_token: Option<&str>) -> Result<Payload> {
        let payload = Payload::new()
            .field("email", &self.email_address)
            .optional_field("description", self.description.as_deref())
            .field("amount", self.amount_in_cents()?)
            .field("currency", &self.currency)
            .field("ip_address", &self.ip_address);

        let payload = match (self.card_token.as_deref(), customer_token) {
            (Some(card), _) if !card.is_empty() => payload.field("card_token", card),
            (_, Some(customer)) => payload.field("customer_token", customer),
            _ => {
                return Err(PinError::Invalid(
                    "Must provide card_token or customer_token".to_string(),
                ))
            }
        };

        Ok(payload)
    }

    /// Copy a charge reply onto the record
    pub fn apply_charge_reply(&mut self, reply: GatewayReply<ChargeData>) {
        self.pin_response_text = reply.raw_text;

        match reply.outcome {
            GatewayResponse::TransportFailure => {
                self.pin_response = Some("Failure.".to_string());
            }
            GatewayResponse::Error(error) => {
                self.pin_response = Some(format!("Failure: {}", error.message()));
                self.transaction_token = error.charge_token;
            }
            GatewayResponse::Success(data) => {
                self.succeeded = true;
                self.transaction_token = Some(data.token);
                if let Some(total_fees) = data.total_fees {
                    let mut fees = Decimal::from(total_fees) / Decimal::ONE_HUNDRED;
                    fees.rescale(2);
                    self.fees = fees;
                }
                self.pin_response = data.status_message;

                let card = data.card.unwrap_or_default();
                self.card_address1 = card.address_line1;
                self.card_address2 = card.address_line2;
                self.card_city = card.address_city;
                self.card_state = card.address_state;
                self.card_postcode = card.address_postcode;
                self.card_country = card.address_country;
                self.card_number = card.display_number;
                self.card_type = card.scheme.as_deref().map(CardScheme::from_pin);
            }
        }
    }

    /// Send this transaction to Pin. Runs at most once per record: an
    /// already-processed record returns `Ok(None)` without any network call.
    pub fn process_transaction<T: Transport>(
        &mut self,
        conn: &Connection,
        gateway: &Gateway<T>,
    ) -> Result<Option<String>> {
        if self.processed {
            return Ok(None);
        }

        self.validate(gateway.resolver())?;
        let client = gateway.client(Some(self.environment.as_str()))?;

        let customer_token = match self.customer_id {
            Some(customer_id) if !self.has_card_token() => {
                let customer = db::get_customer(conn, customer_id)?.ok_or_else(|| {
                    PinError::Invalid(format!("customer {} does not exist", customer_id))
                })?;
                Some(customer.token)
            }
            _ => None,
        };
        let payload = self.charge_payload(customer_token.as_deref())?;

        // Claim the record before talking to Pin
        match self.id {
            Some(id) => {
                if !db::claim_transaction(conn, id)? {
                    warn!("Transaction {} was already processed elsewhere", id);
                    self.processed = true;
                    return Ok(None);
                }
                self.processed = true;
                self.save(conn, gateway.resolver())?;
            }
            None => {
                self.processed = true;
                self.save(conn, gateway.resolver())?;
            }
        }

        let tx_id = self.id.unwrap_or_default();
        info!(
            "Submitting transaction {} ({} {}) to {}",
            tx_id,
            self.amount,
            self.currency,
            client.environment().name
        );

        let reply = client.post::<ChargeData>("/charges", payload, true);
        self.apply_charge_reply(reply);
        self.save(conn, gateway.resolver())?;

        if self.succeeded {
            info!("Transaction {} succeeded: {:?}", tx_id, self.transaction_token);
        } else {
            warn!("Transaction {} failed: {:?}", tx_id, self.pin_response);
        }

        let event = Event::new(
            "transaction_processed",
            "pin_transaction",
            &tx_id.to_string(),
            serde_json::json!({
                "environment": self.environment,
                "succeeded": self.succeeded,
                "transaction_token": self.transaction_token,
                "pin_response": self.pin_response,
            }),
            ACTOR,
        );
        db::insert_event(conn, &event)?;

        Ok(self.pin_response.clone())
    }
}

impl std::fmt::Display for PinTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.id {
            Some(id) => write!(f, "{}", id),
            None => write!(f, "unsaved"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_transactions, get_events_for_entity, get_transaction, setup_database};
    use crate::entities::CustomerToken;
    use crate::gateway::testing::{test_gateway, StubTransport};
    use serde_json::json;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn card_transaction() -> PinTransaction {
        let mut tx = PinTransaction::new(Decimal::new(1999, 2), "roland@pinpayments.com", "203.192.1.172")
            .with_card_token("card_nytGw7koRg23EEp9NTmz9w");
        tx.description = Some("test charge".to_string());
        tx
    }

    fn success_body() -> serde_json::Value {
        json!({
            "response": {
                "token": "ch_lfUYEBK14zotCTykezJkfg",
                "success": true,
                "amount": 1999,
                "currency": "AUD",
                "total_fees": 250,
                "status_message": "Success",
                "card": {
                    "token": "card_nytGw7koRg23EEp9NTmz9w",
                    "scheme": "master",
                    "display_number": "XXXX-XXXX-XXXX-0000",
                    "address_line1": "42 Sevenoaks St",
                    "address_line2": null,
                    "address_city": "Lathlain",
                    "address_postcode": "6454",
                    "address_state": "WA",
                    "address_country": "Australia"
                }
            }
        })
    }

    #[test]
    fn test_save_requires_exactly_one_token() {
        let conn = test_db();
        let stub = StubTransport::new();
        let gateway = test_gateway(&stub);

        let mut neither = PinTransaction::new(Decimal::new(500, 2), "a@b.com", "127.0.0.1");
        assert!(matches!(neither.save(&conn, gateway.resolver()), Err(PinError::Invalid(_))));

        let mut both = card_transaction().with_customer(1);
        assert!(matches!(both.save(&conn, gateway.resolver()), Err(PinError::Invalid(_))));

        let mut empty_card = PinTransaction::new(Decimal::new(500, 2), "a@b.com", "127.0.0.1")
            .with_card_token("");
        assert!(matches!(empty_card.save(&conn, gateway.resolver()), Err(PinError::Invalid(_))));

        assert_eq!(count_transactions(&conn).unwrap(), 0);
    }

    #[test]
    fn test_save_rejects_unknown_environment() {
        let conn = test_db();
        let stub = StubTransport::new();
        let gateway = test_gateway(&stub);

        let mut tx = card_transaction();
        tx.environment = "staging".to_string();

        let err = tx.save(&conn, gateway.resolver()).unwrap_err();
        assert!(err.to_string().contains("staging"));
        assert_eq!(count_transactions(&conn).unwrap(), 0);
    }

    #[test]
    fn test_save_fills_defaults() {
        let conn = test_db();
        let stub = StubTransport::new();
        let gateway = test_gateway(&stub);

        let mut tx = card_transaction();
        tx.save(&conn, gateway.resolver()).unwrap();

        assert_eq!(tx.environment, "test");
        assert!(tx.date.is_some());
        assert_eq!(count_transactions(&conn).unwrap(), 1);
    }

    #[test]
    fn test_amount_in_cents_truncates() {
        let tx = card_transaction();
        assert_eq!(tx.amount_in_cents().unwrap(), 1999);

        let mut odd = card_transaction();
        odd.amount = Decimal::new(19999, 3);
        assert_eq!(odd.amount_in_cents().unwrap(), 1999);

        let mut whole = card_transaction();
        whole.amount = Decimal::new(10, 0);
        assert_eq!(whole.amount_in_cents().unwrap(), 1000);
    }

    #[test]
    fn test_amount_in_cents_out_of_range() {
        let mut tx = card_transaction();
        tx.amount = Decimal::MAX;
        assert!(matches!(tx.amount_in_cents(), Err(PinError::Invalid(_))));

        tx.amount = Decimal::new(i64::MAX, 0);
        assert!(matches!(tx.amount_in_cents(), Err(PinError::Invalid(_))));

        let conn = test_db();
        let stub = StubTransport::new();
        let gateway = test_gateway(&stub);
        tx.amount = Decimal::MAX;
        assert!(tx.process_transaction(&conn, &gateway).is_err());
        assert_eq!(stub.call_count(), 0);
        assert_eq!(count_transactions(&conn).unwrap(), 0);
    }

    #[test]
    fn test_accepted_charge_without_card_is_success() {
        let conn = test_db();
        let stub = StubTransport::new().reply(
            201,
            json!({"response": {"token": "ch_1", "total_fees": 250, "status_message": "Success", "card": null}}),
        );
        let gateway = test_gateway(&stub);

        let mut tx = card_transaction();
        let response = tx.process_transaction(&conn, &gateway).unwrap();

        assert_eq!(response.as_deref(), Some("Success"));
        let stored = get_transaction(&conn, tx.id.unwrap()).unwrap().unwrap();
        assert!(stored.succeeded);
        assert_eq!(stored.transaction_token.as_deref(), Some("ch_1"));
        assert_eq!(stored.fees, Decimal::new(250, 2));
        assert_eq!(stored.card_number, None);
        assert_eq!(stored.card_type, None);
    }

    #[test]
    fn test_accepted_charge_with_malformed_card_keeps_token() {
        let conn = test_db();
        let stub = StubTransport::new().reply(
            201,
            json!({"response": {"token": "ch_2", "status_message": "Success", "card": {"expiry_month": "May"}}}),
        );
        let gateway = test_gateway(&stub);

        let mut tx = card_transaction();
        tx.process_transaction(&conn, &gateway).unwrap();

        assert!(tx.succeeded);
        assert_eq!(tx.transaction_token.as_deref(), Some("ch_2"));
        assert_eq!(tx.fees, Decimal::new(0, 2));
    }

    #[test]
    fn test_successful_charge() {
        let conn = test_db();
        let stub = StubTransport::new().reply(201, success_body());
        let gateway = test_gateway(&stub);

        let mut tx = card_transaction();
        let response = tx.process_transaction(&conn, &gateway).unwrap();

        assert_eq!(response.as_deref(), Some("Success"));

        let request = &stub.requests()[0];
        assert_eq!(request.url, "https://test-api.pinpayments.com/1/charges");
        assert_eq!(request.param("amount"), Some("1999"));
        assert_eq!(request.param("currency"), Some("AUD"));
        assert_eq!(request.param("email"), Some("roland@pinpayments.com"));
        assert_eq!(request.param("ip_address"), Some("203.192.1.172"));
        assert_eq!(request.param("description"), Some("test charge"));
        assert_eq!(request.param("card_token"), Some("card_nytGw7koRg23EEp9NTmz9w"));
        assert_eq!(request.param("customer_token"), None);

        let stored = get_transaction(&conn, tx.id.unwrap()).unwrap().unwrap();
        assert!(stored.processed);
        assert!(stored.succeeded);
        assert_eq!(stored.fees, Decimal::new(250, 2));
        assert_eq!(stored.transaction_token.as_deref(), Some("ch_lfUYEBK14zotCTykezJkfg"));
        assert_eq!(stored.card_city.as_deref(), Some("Lathlain"));
        assert_eq!(stored.card_country.as_deref(), Some("Australia"));
        assert_eq!(stored.card_address2, None);
        assert_eq!(stored.card_number.as_deref(), Some("XXXX-XXXX-XXXX-0000"));
        assert_eq!(stored.card_type, Some(CardScheme::Master));
        assert!(stored.pin_response_text.unwrap().contains("ch_lfUYEBK14zotCTykezJkfg"));

        let events = get_events_for_entity(&conn, "pin_transaction", &tx.id.unwrap().to_string()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["succeeded"], true);
    }

    #[test]
    fn test_declined_charge_records_description() {
        let conn = test_db();
        let stub = StubTransport::new().reply(400, json!({"error": "x", "error_description": "bad card"}));
        let gateway = test_gateway(&stub);

        let mut tx = card_transaction();
        let response = tx.process_transaction(&conn, &gateway).unwrap();

        assert_eq!(response.as_deref(), Some("Failure: bad card"));
        let stored = get_transaction(&conn, tx.id.unwrap()).unwrap().unwrap();
        assert!(stored.processed);
        assert!(!stored.succeeded);
        assert_eq!(stored.pin_response.as_deref(), Some("Failure: bad card"));
        assert_eq!(stored.fees, Decimal::new(0, 2));
    }

    #[test]
    fn test_declined_charge_prefers_first_message() {
        let conn = test_db();
        let stub = StubTransport::new().reply(
            400,
            json!({
                "error": "card_declined",
                "error_description": "The card was declined",
                "charge_token": "ch_declined",
                "messages": [{"code": "card_declined", "message": "Insufficient funds"}]
            }),
        );
        let gateway = test_gateway(&stub);

        let mut tx = card_transaction();
        tx.process_transaction(&conn, &gateway).unwrap();

        assert_eq!(tx.pin_response.as_deref(), Some("Failure: Insufficient funds"));
        assert_eq!(tx.transaction_token.as_deref(), Some("ch_declined"));
        assert!(!tx.succeeded);
    }

    #[test]
    fn test_transport_failure_is_recorded_not_raised() {
        let conn = test_db();
        let stub = StubTransport::new().fail("connection reset");
        let gateway = test_gateway(&stub);

        let mut tx = card_transaction();
        let response = tx.process_transaction(&conn, &gateway).unwrap();

        assert_eq!(response.as_deref(), Some("Failure."));
        let stored = get_transaction(&conn, tx.id.unwrap()).unwrap().unwrap();
        assert!(stored.processed);
        assert!(!stored.succeeded);
        assert_eq!(stored.pin_response_text, None);
    }

    #[test]
    fn test_non_json_body_is_failure() {
        let conn = test_db();
        let stub = StubTransport::new().reply_raw(500, "<html>oops</html>");
        let gateway = test_gateway(&stub);

        let mut tx = card_transaction();
        tx.process_transaction(&conn, &gateway).unwrap();

        assert_eq!(tx.pin_response.as_deref(), Some("Failure."));
        assert_eq!(tx.pin_response_text.as_deref(), Some("<html>oops</html>"));
    }

    #[test]
    fn test_second_call_makes_no_network_call() {
        let conn = test_db();
        let stub = StubTransport::new().reply(201, success_body()).reply(201, success_body());
        let gateway = test_gateway(&stub);

        let mut tx = card_transaction();
        assert!(tx.process_transaction(&conn, &gateway).unwrap().is_some());
        assert_eq!(tx.process_transaction(&conn, &gateway).unwrap(), None);
        assert_eq!(stub.call_count(), 1);

        // A stale copy loaded before the first submission cannot resubmit either
        let mut stale = get_transaction(&conn, tx.id.unwrap()).unwrap().unwrap();
        stale.processed = false;
        assert_eq!(stale.process_transaction(&conn, &gateway).unwrap(), None);
        assert_eq!(stub.call_count(), 1);
    }

    #[test]
    fn test_processed_is_persisted_before_the_call() {
        let conn = test_db();
        let stub = StubTransport::new().fail("crash");
        let gateway = test_gateway(&stub);

        let mut tx = card_transaction();
        tx.save(&conn, gateway.resolver()).unwrap();
        let id = tx.id.unwrap();
        assert!(!get_transaction(&conn, id).unwrap().unwrap().processed);

        tx.process_transaction(&conn, &gateway).unwrap();
        assert!(get_transaction(&conn, id).unwrap().unwrap().processed);
        assert!(!db::claim_transaction(&conn, id).unwrap());
    }

    #[test]
    fn test_invalid_record_is_not_claimed_or_sent() {
        let conn = test_db();
        let stub = StubTransport::new();
        let gateway = test_gateway(&stub);

        let mut tx = PinTransaction::new(Decimal::new(100, 2), "a@b.com", "127.0.0.1");
        assert!(tx.process_transaction(&conn, &gateway).is_err());
        assert!(!tx.processed);
        assert_eq!(stub.call_count(), 0);
        assert_eq!(count_transactions(&conn).unwrap(), 0);
    }

    #[test]
    fn test_customer_charge_sends_customer_token() {
        let conn = test_db();
        let stub = StubTransport::new().reply(201, success_body());
        let gateway = test_gateway(&stub);

        let mut customer = CustomerToken::new("cus_XZg1ULpWaROQCOT5PfREbA", "roland@pinpayments.com", "live");
        let customer_id = customer.save(&conn, gateway.resolver()).unwrap();

        let mut tx = PinTransaction::new(Decimal::new(5000, 2), "roland@pinpayments.com", "127.0.0.1")
            .with_customer(customer_id);
        tx.environment = "live".to_string();
        tx.process_transaction(&conn, &gateway).unwrap();

        let request = &stub.requests()[0];
        assert_eq!(request.url, "https://api.pinpayments.com/1/charges");
        assert_eq!(request.param("customer_token"), Some("cus_XZg1ULpWaROQCOT5PfREbA"));
        assert_eq!(request.param("card_token"), None);
        assert_eq!(request.param("amount"), Some("5000"));
        assert_eq!(stub.secrets(), vec!["sk_live".to_string()]);
    }
}
