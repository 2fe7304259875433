// 🏦 Recipients - payees of Pin transfers and their bank accounts

use crate::db::{self, Event};
use crate::entities::customer::ACTOR;
use crate::error::{PinError, Result};
use crate::gateway::{Gateway, Transport};
use crate::wire::{BankAccountData, Payload, RecipientData};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Bank account as Pin reported it. BSB and number stay text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    pub id: Option<i64>,
    pub token: String,
    pub bank_name: String,
    pub branch: String,
    pub name: String,
    pub bsb: String,
    pub number: String,
    pub environment: String,
}

impl BankAccount {
    pub fn from_pin_data(data: &BankAccountData, environment: &str) -> Self {
        BankAccount {
            id: None,
            token: data.token.clone(),
            bank_name: data.bank_name.clone(),
            branch: data.branch.clone(),
            name: data.name.clone(),
            bsb: data.bsb.clone(),
            number: data.number.clone(),
            environment: environment.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinRecipient {
    pub id: Option<i64>,
    pub token: String,
    pub email: String,
    pub name: Option<String>,
    pub created: DateTime<Utc>,
    pub bank_account_id: Option<i64>,
    pub environment: String,
}

impl PinRecipient {
    /// Register a payee and its bank account with Pin and store both.
    ///
    /// Nothing is written unless Pin answers with a recipient. The two rows
    /// are inserted in one SQLite transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn create_with_bank_account<T: Transport>(
        conn: &Connection,
        gateway: &Gateway<T>,
        email: &str,
        account_name: &str,
        bsb: &str,
        number: &str,
        name: Option<&str>,
        environment: Option<&str>,
    ) -> Result<PinRecipient> {
        let client = gateway.client(environment)?;
        let payload = Payload::new()
            .field("email", email)
            .optional_field("name", name)
            .field("bank_account[name]", account_name)
            .field("bank_account[bsb]", bsb)
            .field("bank_account[number]", number);

        let data: RecipientData = client.post("/recipients", payload, false).into_result()?;
        let env_name = client.environment().name.clone();

        let tx = conn.unchecked_transaction()?;

        let mut account = BankAccount::from_pin_data(&data.bank_account, &env_name);
        let account_id = db::insert_bank_account(&tx, &account)?;
        account.id = Some(account_id);

        let mut recipient = PinRecipient {
            id: None,
            token: data.token,
            email: data.email,
            name: data.name,
            created: Utc::now(),
            bank_account_id: Some(account_id),
            environment: env_name,
        };
        let recipient_id = db::insert_recipient(&tx, &recipient)?;
        recipient.id = Some(recipient_id);

        let event = Event::new(
            "recipient_created",
            "pin_recipient",
            &recipient.token,
            serde_json::json!({
                "environment": recipient.environment,
                "bank_account_token": account.token,
            }),
            ACTOR,
        );
        db::insert_event(&tx, &event)?;
        tx.commit()?;

        info!("Created recipient {} in {}", recipient.token, recipient.environment);
        Ok(recipient)
    }

    pub fn bank_account(&self, conn: &Connection) -> Result<Option<BankAccount>> {
        match self.bank_account_id {
            Some(id) => db::get_bank_account(conn, id),
            None => Ok(None),
        }
    }

    pub(crate) fn require_id(&self) -> Result<i64> {
        self.id
            .ok_or_else(|| PinError::Invalid(format!("recipient {} has not been saved", self.token)))
    }
}

impl std::fmt::Display for PinRecipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token)
    }
}
