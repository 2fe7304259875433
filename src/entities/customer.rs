// 👤 Customer Token - reusable Pin customer owning a set of cards
//
// Invariants kept by the flows below (not by the schema):
// - a card token appears at most once per customer
// - at most one card is primary

use crate::db::{self, Event};
use crate::entities::card::CardToken;
use crate::environment::EnvironmentResolver;
use crate::error::{PinError, Result};
use crate::gateway::{Gateway, Transport};
use crate::wire::{CardData, CustomerData, Payload};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub(crate) const ACTOR: &str = "pin-ledger";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerToken {
    pub id: Option<i64>,
    pub environment: String,
    pub token: String,
    /// Email of the owning user, as registered with Pin
    pub email: String,
    pub active: bool,
    pub created: DateTime<Utc>,
}

impl CustomerToken {
    pub fn new(token: &str, email: &str, environment: &str) -> Self {
        CustomerToken {
            id: None,
            environment: environment.to_string(),
            token: token.to_string(),
            email: email.to_string(),
            active: true,
            created: Utc::now(),
        }
    }

    fn require_id(&self) -> Result<i64> {
        self.id
            .ok_or_else(|| PinError::Invalid(format!("customer {} has not been saved", self.token)))
    }

    /// Insert or update. An empty environment becomes the default one.
    pub fn save(&mut self, conn: &Connection, resolver: &EnvironmentResolver) -> Result<i64> {
        if self.environment.is_empty() {
            self.environment = resolver.default_name().to_string();
        }

        match self.id {
            Some(id) => {
                db::update_customer(conn, id, self)?;
                Ok(id)
            }
            None => {
                let id = db::insert_customer(conn, self)?;
                self.id = Some(id);
                Ok(id)
            }
        }
    }

    pub fn cards(&self, conn: &Connection) -> Result<Vec<CardToken>> {
        db::get_customer_cards(conn, self.require_id()?)
    }

    /// The primary card. More than one flagged means local state drifted from
    /// Pin: the oldest wins and a warning is logged.
    pub fn primary_card(&self, conn: &Connection) -> Result<Option<CardToken>> {
        let primaries: Vec<CardToken> = self.cards(conn)?.into_iter().filter(|c| c.primary).collect();

        if primaries.len() > 1 {
            warn!(
                "CustomerToken {} has {} primary cards, sync this customer's cards",
                self.token,
                primaries.len()
            );
        }

        Ok(primaries.into_iter().next())
    }

    fn find_card(&self, conn: &Connection, token: &str) -> Result<Option<CardToken>> {
        Ok(self.cards(conn)?.into_iter().find(|c| c.token == token))
    }

    /// Local copy of a card Pin just returned, if we already hold it
    fn known_card(&self, conn: &Connection, data: &CardData) -> Result<Option<CardToken>> {
        match data.token.as_deref() {
            Some(token) => self.find_card(conn, token),
            None => Ok(None),
        }
    }

    /// Mark `card_id` primary and clear every other card of this customer
    fn make_primary(&self, conn: &Connection, card_id: i64) -> Result<()> {
        let tx = conn.unchecked_transaction()?;
        for card in db::get_customer_cards(&tx, self.require_id()?)? {
            if let Some(id) = card.id {
                db::set_card_primary(&tx, id, id == card_id)?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn store_card(&self, conn: &Connection, data: &CardData) -> Result<CardToken> {
        let mut card = CardToken::from_pin_data(data, &self.environment)?;
        card.primary = false;

        let card_id = db::insert_card(conn, &card)?;
        db::link_card(conn, self.require_id()?, card_id)?;
        card.id = Some(card_id);
        Ok(card)
    }

    fn record(&self, conn: &Connection, event_type: &str, data: serde_json::Value) -> Result<()> {
        let event = Event::new(event_type, "customer_token", &self.token, data, ACTOR);
        db::insert_event(conn, &event)
    }

    // ========================================================================
    // GATEWAY FLOWS
    // ========================================================================

    /// Exchange a card token for a Pin customer; the card becomes primary
    pub fn create_from_card_token<T: Transport>(
        conn: &Connection,
        gateway: &Gateway<T>,
        card_token: &str,
        email: &str,
        environment: Option<&str>,
    ) -> Result<CustomerToken> {
        let client = gateway.client(environment)?;
        let payload = Payload::new().field("email", email).field("card_token", card_token);

        let data: CustomerData = client.post("/customers", payload, false).into_result()?;
        let env_name = client.environment().name.clone();

        let tx = conn.unchecked_transaction()?;
        let mut customer = CustomerToken::new(&data.token, data.email.as_deref().unwrap_or(email), &env_name);
        let customer_id = db::insert_customer(&tx, &customer)?;
        customer.id = Some(customer_id);

        if let Some(card_data) = data.card.as_ref() {
            let mut card = CardToken::from_pin_data(card_data, &env_name)?;
            card.primary = true;
            let card_id = db::insert_card(&tx, &card)?;
            db::link_card(&tx, customer_id, card_id)?;
        }

        customer.record(&tx, "customer_created", serde_json::json!({ "card_token": card_token }))?;
        tx.commit()?;

        info!("Created customer {} in {}", customer.token, env_name);
        Ok(customer)
    }

    /// Replace the customer's primary card at Pin and mirror the returned
    /// card locally. A failed local write after a successful PUT is not
    /// rolled back at Pin.
    pub fn update_card<T: Transport>(
        &self,
        conn: &Connection,
        gateway: &Gateway<T>,
        card_token: &str,
    ) -> Result<CardToken> {
        let customer_id = self.require_id()?;
        let client = gateway.client(Some(self.environment.as_str()))?;
        let payload = Payload::new().field("card_token", card_token);

        let path = format!("/customers/{}", self.token);
        let data: CustomerData = client.put(&path, payload).into_result()?;
        let card_data = data.card.ok_or_else(|| PinError::Gateway {
            payment: false,
            message: "customer response has no card".to_string(),
        })?;

        let mut card = match self.known_card(conn, &card_data)? {
            Some(existing) => existing,
            None => self.store_card(conn, &card_data)?,
        };
        if let Some(card_id) = card.id {
            db::link_card(conn, customer_id, card_id)?;
            self.make_primary(conn, card_id)?;
        }
        card.primary = true;

        self.record(conn, "customer_card_updated", serde_json::json!({ "card_token": card.token }))?;

        info!("Customer {} now charges card {}", self.token, card.token);
        Ok(card)
    }

    /// Attach another card to the customer. Re-adding a known token returns
    /// the existing card.
    pub fn add_card_token<T: Transport>(
        &self,
        conn: &Connection,
        gateway: &Gateway<T>,
        card_token: &str,
    ) -> Result<CardToken> {
        self.require_id()?;
        let client = gateway.client(Some(self.environment.as_str()))?;
        let payload = Payload::new().field("card_token", card_token);

        let path = format!("/customers/{}/cards", self.token);
        let data: CardData = client.post(&path, payload, false).into_result()?;

        if let Some(existing) = self.known_card(conn, &data)? {
            return Ok(existing);
        }

        let mut card = self.store_card(conn, &data)?;
        if data.primary == Some(true) {
            if let Some(card_id) = card.id {
                self.make_primary(conn, card_id)?;
                card.primary = true;
            }
        }

        self.record(conn, "customer_card_added", serde_json::json!({ "card_token": card.token }))?;
        Ok(card)
    }

    /// Remove a non-primary card at Pin and locally
    pub fn delete_card<T: Transport>(
        &self,
        conn: &Connection,
        gateway: &Gateway<T>,
        card: &CardToken,
    ) -> Result<()> {
        let local = self
            .find_card(conn, &card.token)?
            .ok_or_else(|| PinError::Invalid(format!("card {} does not belong to customer {}", card.token, self.token)))?;

        if local.primary {
            return Err(PinError::Invalid(format!(
                "card {} is the primary card of customer {}",
                card.token, self.token
            )));
        }

        let client = gateway.client(Some(self.environment.as_str()))?;
        let path = format!("/customers/{}/cards/{}", self.token, card.token);
        client.delete(&path).into_result()?;

        if let Some(card_id) = local.id {
            db::delete_card(conn, card_id)?;
        }
        self.record(conn, "customer_card_deleted", serde_json::json!({ "card_token": card.token }))?;
        Ok(())
    }

    pub fn set_primary_card<T: Transport>(
        &self,
        conn: &Connection,
        gateway: &Gateway<T>,
        card: &CardToken,
    ) -> Result<()> {
        let local = self
            .find_card(conn, &card.token)?
            .ok_or_else(|| PinError::Invalid(format!("card {} does not belong to customer {}", card.token, self.token)))?;

        let client = gateway.client(Some(self.environment.as_str()))?;
        let payload = Payload::new().field("primary_card_token", &card.token);
        let path = format!("/customers/{}", self.token);
        let _: CustomerData = client.put(&path, payload).into_result()?;

        if let Some(card_id) = local.id {
            self.make_primary(conn, card_id)?;
        }
        self.record(conn, "customer_primary_card_set", serde_json::json!({ "card_token": card.token }))?;
        Ok(())
    }

    /// Make the local card set match Pin's: add unknown cards, drop cards Pin
    /// no longer has, copy the primary flag.
    pub fn sync_cards<T: Transport>(&self, conn: &Connection, gateway: &Gateway<T>) -> Result<Vec<CardToken>> {
        let client = gateway.client(Some(self.environment.as_str()))?;
        let path = format!("/customers/{}/cards", self.token);
        let remote: Vec<CardData> = client.get_all(&path)?;

        let local = self.cards(conn)?;
        let tx = conn.unchecked_transaction()?;

        for card in &local {
            let still_remote = remote.iter().any(|r| r.token.as_deref() == Some(card.token.as_str()));
            if !still_remote {
                if let Some(card_id) = card.id {
                    db::delete_card(&tx, card_id)?;
                }
            }
        }

        for data in &remote {
            let known = local.iter().find(|c| Some(c.token.as_str()) == data.token.as_deref());
            let card_id = match known.and_then(|c| c.id) {
                Some(id) => id,
                None => self.store_card(&tx, data)?.id.unwrap_or_default(),
            };
            db::set_card_primary(&tx, card_id, data.primary.unwrap_or(false))?;
        }

        self.record(&tx, "customer_cards_synced", serde_json::json!({ "remote_cards": remote.len() }))?;
        tx.commit()?;

        self.cards(conn)
    }
}

impl std::fmt::Display for CustomerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::CardScheme;
    use crate::gateway::testing::{test_gateway, StubTransport};
    use crate::gateway::Method;
    use serde_json::json;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn card_json(token: &str, primary: bool) -> serde_json::Value {
        json!({
            "token": token,
            "scheme": "visa",
            "display_number": "XXXX-XXXX-XXXX-1111",
            "name": "Roland Robot",
            "expiry_month": 5,
            "expiry_year": 2030,
            "primary": primary
        })
    }

    fn created_customer(conn: &Connection) -> CustomerToken {
        let stub = StubTransport::new().reply(
            201,
            json!({"response": {"token": "cus_1", "email": "roland@pinpayments.com", "card": card_json("card_1", true)}}),
        );
        let gateway = test_gateway(&stub);
        CustomerToken::create_from_card_token(conn, &gateway, "card_1", "roland@pinpayments.com", None).unwrap()
    }

    #[test]
    fn test_create_from_card_token() {
        let conn = test_db();
        let stub = StubTransport::new().reply(
            201,
            json!({"response": {"token": "cus_1", "email": "roland@pinpayments.com", "card": card_json("card_1", true)}}),
        );
        let gateway = test_gateway(&stub);

        let customer =
            CustomerToken::create_from_card_token(&conn, &gateway, "card_1", "roland@pinpayments.com", Some("live"))
                .unwrap();

        assert_eq!(customer.token, "cus_1");
        assert_eq!(customer.environment, "live");
        assert!(customer.active);

        let request = &stub.requests()[0];
        assert_eq!(request.url, "https://api.pinpayments.com/1/customers");
        assert_eq!(request.param("card_token"), Some("card_1"));
        assert_eq!(request.param("email"), Some("roland@pinpayments.com"));

        let primary = customer.primary_card(&conn).unwrap().unwrap();
        assert_eq!(primary.token, "card_1");
        assert_eq!(primary.scheme, Some(CardScheme::Visa));
    }

    #[test]
    fn test_create_from_card_token_error_writes_nothing() {
        let conn = test_db();
        let stub = StubTransport::new().reply(
            422,
            json!({"error": "invalid_resource", "error_description": "card_token is invalid"}),
        );
        let gateway = test_gateway(&stub);

        let result = CustomerToken::create_from_card_token(&conn, &gateway, "bogus", "a@b.com", None);

        assert!(matches!(result, Err(PinError::Gateway { payment: false, .. })));
        let customers: i64 = conn
            .query_row("SELECT COUNT(*) FROM customer_tokens", [], |r| r.get(0))
            .unwrap();
        assert_eq!(customers, 0);
    }

    #[test]
    fn test_save_defaults_environment() {
        let conn = test_db();
        let stub = StubTransport::new();
        let gateway = test_gateway(&stub);

        let mut customer = CustomerToken::new("cus_1", "a@b.com", "");
        customer.save(&conn, gateway.resolver()).unwrap();

        assert_eq!(customer.environment, "test");
        let stored = db::get_customer(&conn, customer.id.unwrap()).unwrap().unwrap();
        assert_eq!(stored.environment, "test");
    }

    #[test]
    fn test_update_card_replaces_primary() {
        let conn = test_db();
        let customer = created_customer(&conn);

        let stub = StubTransport::new().reply(
            200,
            json!({"response": {"token": "cus_1", "card": card_json("card_2", true)}}),
        );
        let gateway = test_gateway(&stub);

        let card = customer.update_card(&conn, &gateway, "card_2").unwrap();

        assert_eq!(card.token, "card_2");
        assert_eq!(card.display_number.as_deref(), Some("XXXX-XXXX-XXXX-1111"));
        assert_eq!(card.name.as_deref(), Some("Roland Robot"));

        let request = &stub.requests()[0];
        assert_eq!(request.method, Method::Put);
        assert_eq!(request.url, "https://test-api.pinpayments.com/1/customers/cus_1");

        let cards = customer.cards(&conn).unwrap();
        assert_eq!(cards.len(), 2);
        assert_eq!(cards.iter().filter(|c| c.primary).count(), 1);
        assert_eq!(customer.primary_card(&conn).unwrap().unwrap().token, "card_2");
    }

    #[test]
    fn test_add_card_token_is_not_duplicated() {
        let conn = test_db();
        let customer = created_customer(&conn);

        let stub = StubTransport::new()
            .reply(201, json!({"response": card_json("card_2", false)}))
            .reply(201, json!({"response": card_json("card_2", false)}));
        let gateway = test_gateway(&stub);

        let added = customer.add_card_token(&conn, &gateway, "card_2").unwrap();
        let again = customer.add_card_token(&conn, &gateway, "card_2").unwrap();

        assert_eq!(added.id, again.id);
        assert_eq!(customer.cards(&conn).unwrap().len(), 2);
        assert_eq!(customer.primary_card(&conn).unwrap().unwrap().token, "card_1");
    }

    #[test]
    fn test_set_primary_card_and_delete_old_one() {
        let conn = test_db();
        let customer = created_customer(&conn);

        let stub = StubTransport::new()
            .reply(201, json!({"response": card_json("card_2", false)}))
            .reply(200, json!({"response": {"token": "cus_1"}}))
            .reply_raw(204, "");
        let gateway = test_gateway(&stub);

        let second = customer.add_card_token(&conn, &gateway, "card_2").unwrap();
        customer.set_primary_card(&conn, &gateway, &second).unwrap();
        assert_eq!(stub.requests()[1].param("primary_card_token"), Some("card_2"));

        let first = customer
            .cards(&conn)
            .unwrap()
            .into_iter()
            .find(|c| c.token == "card_1")
            .unwrap();
        assert!(!first.primary);

        customer.delete_card(&conn, &gateway, &first).unwrap();
        let cards = customer.cards(&conn).unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].token, "card_2");
        assert!(cards[0].primary);
    }

    #[test]
    fn test_delete_primary_card_is_refused_without_calling_pin() {
        let conn = test_db();
        let customer = created_customer(&conn);
        let stub = StubTransport::new();
        let gateway = test_gateway(&stub);

        let primary = customer.primary_card(&conn).unwrap().unwrap();
        let result = customer.delete_card(&conn, &gateway, &primary);

        assert!(matches!(result, Err(PinError::Invalid(_))));
        assert_eq!(stub.call_count(), 0);
    }

    #[test]
    fn test_sync_cards_mirrors_remote() {
        let conn = test_db();
        let customer = created_customer(&conn);

        let stub = StubTransport::new().reply(
            200,
            json!({"response": [card_json("card_3", true), card_json("card_4", false)]}),
        );
        let gateway = test_gateway(&stub);

        let cards = customer.sync_cards(&conn, &gateway).unwrap();

        let tokens: Vec<&str> = cards.iter().map(|c| c.token.as_str()).collect();
        assert_eq!(tokens.len(), 2);
        assert!(tokens.contains(&"card_3"));
        assert!(tokens.contains(&"card_4"));
        assert_eq!(customer.primary_card(&conn).unwrap().unwrap().token, "card_3");
        assert_eq!(stub.requests()[0].method, Method::Get);
    }

    #[test]
    fn test_sync_cards_keeps_cards_from_later_pages() {
        let conn = test_db();
        let customer = created_customer(&conn);

        let stub = StubTransport::new()
            .reply(
                200,
                json!({"response": [card_json("card_1", true)], "pagination": {"current": 1, "next": 2, "pages": 2}}),
            )
            .reply(
                200,
                json!({"response": [card_json("card_5", false)], "pagination": {"current": 2, "next": null, "pages": 2}}),
            );
        let gateway = test_gateway(&stub);

        let cards = customer.sync_cards(&conn, &gateway).unwrap();

        assert_eq!(stub.call_count(), 2);
        assert_eq!(cards.len(), 2);
        assert!(cards.iter().any(|c| c.token == "card_1" && c.primary));
        assert!(cards.iter().any(|c| c.token == "card_5" && !c.primary));
    }

    #[test]
    fn test_sync_cards_failure_deletes_nothing() {
        let conn = test_db();
        let customer = created_customer(&conn);

        let stub = StubTransport::new()
            .reply(
                200,
                json!({"response": [card_json("card_9", true)], "pagination": {"current": 1, "next": 2, "pages": 2}}),
            )
            .fail("timeout");
        let gateway = test_gateway(&stub);

        assert!(customer.sync_cards(&conn, &gateway).is_err());
        let cards = customer.cards(&conn).unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].token, "card_1");
    }

    #[test]
    fn test_unsaved_customer_cannot_list_cards() {
        let conn = test_db();
        let customer = CustomerToken::new("cus_x", "a@b.com", "test");
        assert!(matches!(customer.cards(&conn), Err(PinError::Invalid(_))));
    }
}
