// 💸 Pin Transfer - money sent to a recipient's bank account
//
// Amount is in the currency's minor unit (cents for AUD), unlike
// `PinTransaction::amount` which is in dollars.

use crate::db::{self, Event};
use crate::entities::customer::ACTOR;
use crate::entities::recipient::PinRecipient;
use crate::entities::transaction::DEFAULT_CURRENCY;
use crate::error::Result;
use crate::gateway::{Gateway, Transport};
use crate::wire::{Payload, TransferData};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Currencies without a minor unit
const ZERO_DECIMAL_CURRENCIES: &[&str] = &["JPY", "KRW"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinTransfer {
    pub id: Option<i64>,
    pub transfer_token: Option<String>,
    pub status: Option<String>,
    pub currency: String,
    pub description: Option<String>,
    /// Minor units
    pub amount: i64,
    pub recipient_id: Option<i64>,
    pub created: DateTime<Utc>,
    pub pin_response_text: Option<String>,
}

impl PinTransfer {
    /// Amount in major units: 1050 AUD → 10.50, 1050 JPY → 1050
    pub fn value(&self) -> Decimal {
        let currency = self.currency.to_uppercase();
        if ZERO_DECIMAL_CURRENCIES.contains(&currency.as_str()) {
            Decimal::from(self.amount)
        } else {
            Decimal::new(self.amount, 2)
        }
    }

    /// Send `amount` minor units to `recipient` and store the transfer.
    /// A rejected transfer is returned as an error and leaves no row.
    ///
    /// `environment` defaults to the one the recipient was created in.
    pub fn send_new<T: Transport>(
        conn: &Connection,
        gateway: &Gateway<T>,
        amount: i64,
        description: &str,
        recipient: &PinRecipient,
        currency: Option<&str>,
        environment: Option<&str>,
    ) -> Result<PinTransfer> {
        let recipient_id = recipient.require_id()?;
        let currency = currency.unwrap_or(DEFAULT_CURRENCY);

        let environment = environment.unwrap_or(recipient.environment.as_str());
        let client = gateway.client(Some(environment))?;
        let payload = Payload::new()
            .field("amount", amount)
            .field("description", description)
            .field("recipient", &recipient.token)
            .field("currency", currency);

        let reply = client.post::<TransferData>("/transfers", payload, false);
        let raw_text = reply.raw_text.clone();
        let data = reply.into_result()?;

        let mut transfer = PinTransfer {
            id: None,
            transfer_token: Some(data.token),
            status: data.status,
            currency: data.currency,
            description: data.description.or_else(|| Some(description.to_string())),
            amount: data.amount,
            recipient_id: Some(recipient_id),
            created: Utc::now(),
            pin_response_text: raw_text,
        };

        let tx = conn.unchecked_transaction()?;
        let transfer_id = db::insert_transfer(&tx, &transfer)?;
        transfer.id = Some(transfer_id);

        let event = Event::new(
            "transfer_sent",
            "pin_transfer",
            &transfer_id.to_string(),
            serde_json::json!({
                "recipient": recipient.token,
                "transfer_token": transfer.transfer_token,
                "amount": transfer.amount,
                "currency": transfer.currency,
            }),
            ACTOR,
        );
        db::insert_event(&tx, &event)?;
        tx.commit()?;

        info!(
            "Transfer {:?} of {} {} to {}: {:?}",
            transfer.transfer_token,
            transfer.value(),
            transfer.currency,
            recipient.token,
            transfer.status
        );
        Ok(transfer)
    }
}
