use crate::entities::{
    BankAccount, CardScheme, CardToken, CustomerToken, PinRecipient, PinTransaction, PinTransfer,
};
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::str::FromStr;

/// Event for the audit trail: every gateway round trip leaves one
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases answer "memory"
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", true)?;

    // ==========================================================================
    // Cards & Customers
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS card_tokens (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            environment TEXT NOT NULL DEFAULT '',
            token TEXT NOT NULL,
            scheme TEXT,
            name TEXT,
            display_number TEXT,
            expiry_month INTEGER,
            expiry_year INTEGER,
            address_line1 TEXT,
            address_line2 TEXT,
            address_city TEXT,
            address_state TEXT,
            address_postcode TEXT,
            address_country TEXT,
            is_primary INTEGER NOT NULL DEFAULT 0,
            created TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS customer_tokens (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            environment TEXT NOT NULL DEFAULT '',
            token TEXT NOT NULL,
            email TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS customer_cards (
            customer_id INTEGER NOT NULL REFERENCES customer_tokens(id) ON DELETE CASCADE,
            card_id INTEGER NOT NULL REFERENCES card_tokens(id) ON DELETE CASCADE,
            PRIMARY KEY (customer_id, card_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Charges
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS pin_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL,
            environment TEXT NOT NULL DEFAULT '',
            amount TEXT NOT NULL,
            fees TEXT NOT NULL DEFAULT '0.00',
            description TEXT,
            processed INTEGER NOT NULL DEFAULT 0,
            succeeded INTEGER NOT NULL DEFAULT 0,
            currency TEXT NOT NULL DEFAULT 'AUD',
            transaction_token TEXT,
            card_token TEXT,
            customer_id INTEGER REFERENCES customer_tokens(id),
            pin_response TEXT,
            ip_address TEXT NOT NULL,
            email_address TEXT NOT NULL,
            card_address1 TEXT,
            card_address2 TEXT,
            card_city TEXT,
            card_state TEXT,
            card_postcode TEXT,
            card_country TEXT,
            card_number TEXT,
            card_type TEXT,
            pin_response_text TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Recipients & Transfers
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS bank_accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            token TEXT NOT NULL,
            bank_name TEXT NOT NULL,
            branch TEXT NOT NULL DEFAULT '',
            name TEXT NOT NULL,
            bsb TEXT NOT NULL,
            number TEXT NOT NULL,
            environment TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pin_recipients (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            token TEXT NOT NULL,
            email TEXT NOT NULL,
            name TEXT,
            created TEXT NOT NULL,
            bank_account_id INTEGER REFERENCES bank_accounts(id),
            environment TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pin_transfers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transfer_token TEXT,
            status TEXT,
            currency TEXT NOT NULL,
            description TEXT,
            amount INTEGER NOT NULL,
            recipient_id INTEGER REFERENCES pin_recipients(id),
            created TEXT NOT NULL,
            pin_response_text TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_token ON pin_transactions(transaction_token)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_date ON pin_transactions(date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transfers_token ON pin_transfers(transfer_token)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_recipients_token ON pin_recipients(token)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// COLUMN HELPERS
// ============================================================================

fn conversion_error(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn decimal_column(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn scheme_column(row: &Row, idx: usize) -> rusqlite::Result<Option<CardScheme>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.as_deref().map(CardScheme::from_pin))
}

// ============================================================================
// CARD TOKENS
// ============================================================================

const CARD_COLUMNS: &str = "id, environment, token, scheme, name, display_number,
    expiry_month, expiry_year, address_line1, address_line2, address_city,
    address_state, address_postcode, address_country, is_primary, created";

fn row_to_card(row: &Row) -> rusqlite::Result<CardToken> {
    Ok(CardToken {
        id: row.get(0)?,
        environment: row.get(1)?,
        token: row.get(2)?,
        scheme: scheme_column(row, 3)?,
        name: row.get(4)?,
        display_number: row.get(5)?,
        expiry_month: row.get(6)?,
        expiry_year: row.get(7)?,
        address_line1: row.get(8)?,
        address_line2: row.get(9)?,
        address_city: row.get(10)?,
        address_state: row.get(11)?,
        address_postcode: row.get(12)?,
        address_country: row.get(13)?,
        primary: row.get(14)?,
        created: timestamp_column(row, 15)?,
    })
}

pub fn insert_card(conn: &Connection, card: &CardToken) -> Result<i64> {
    conn.execute(
        "INSERT INTO card_tokens (
            environment, token, scheme, name, display_number, expiry_month, expiry_year,
            address_line1, address_line2, address_city, address_state, address_postcode,
            address_country, is_primary, created
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            card.environment,
            card.token,
            card.scheme.as_ref().map(|s| s.as_str()),
            card.name,
            card.display_number,
            card.expiry_month,
            card.expiry_year,
            card.address_line1,
            card.address_line2,
            card.address_city,
            card.address_state,
            card.address_postcode,
            card.address_country,
            card.primary,
            card.created.to_rfc3339(),
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

pub fn set_card_primary(conn: &Connection, card_id: i64, primary: bool) -> Result<()> {
    conn.execute(
        "UPDATE card_tokens SET is_primary = ?1 WHERE id = ?2",
        params![primary, card_id],
    )?;
    Ok(())
}

pub fn delete_card(conn: &Connection, card_id: i64) -> Result<()> {
    conn.execute("DELETE FROM customer_cards WHERE card_id = ?1", [card_id])?;
    conn.execute("DELETE FROM card_tokens WHERE id = ?1", [card_id])?;
    Ok(())
}

pub fn get_card(conn: &Connection, card_id: i64) -> Result<Option<CardToken>> {
    let sql = format!("SELECT {} FROM card_tokens WHERE id = ?1", CARD_COLUMNS);
    Ok(conn.query_row(&sql, [card_id], row_to_card).optional()?)
}

// ============================================================================
// CUSTOMER TOKENS
// ============================================================================

fn row_to_customer(row: &Row) -> rusqlite::Result<CustomerToken> {
    Ok(CustomerToken {
        id: row.get(0)?,
        environment: row.get(1)?,
        token: row.get(2)?,
        email: row.get(3)?,
        active: row.get(4)?,
        created: timestamp_column(row, 5)?,
    })
}

pub fn insert_customer(conn: &Connection, customer: &CustomerToken) -> Result<i64> {
    conn.execute(
        "INSERT INTO customer_tokens (environment, token, email, active, created)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            customer.environment,
            customer.token,
            customer.email,
            customer.active,
            customer.created.to_rfc3339(),
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

pub fn update_customer(conn: &Connection, customer_id: i64, customer: &CustomerToken) -> Result<()> {
    conn.execute(
        "UPDATE customer_tokens SET environment = ?1, token = ?2, email = ?3, active = ?4
         WHERE id = ?5",
        params![
            customer.environment,
            customer.token,
            customer.email,
            customer.active,
            customer_id,
        ],
    )?;
    Ok(())
}

pub fn get_customer(conn: &Connection, customer_id: i64) -> Result<Option<CustomerToken>> {
    Ok(conn
        .query_row(
            "SELECT id, environment, token, email, active, created
             FROM customer_tokens WHERE id = ?1",
            [customer_id],
            row_to_customer,
        )
        .optional()?)
}

pub fn link_card(conn: &Connection, customer_id: i64, card_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO customer_cards (customer_id, card_id) VALUES (?1, ?2)",
        params![customer_id, card_id],
    )?;
    Ok(())
}

/// Cards owned by a customer, oldest first
pub fn get_customer_cards(conn: &Connection, customer_id: i64) -> Result<Vec<CardToken>> {
    let sql = format!(
        "SELECT {} FROM card_tokens
         WHERE id IN (SELECT card_id FROM customer_cards WHERE customer_id = ?1)
         ORDER BY created ASC, id ASC",
        CARD_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;

    let cards = stmt
        .query_map([customer_id], row_to_card)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(cards)
}

// ============================================================================
// PIN TRANSACTIONS
// ============================================================================

const TRANSACTION_COLUMNS: &str = "id, date, environment, amount, fees, description,
    processed, succeeded, currency, transaction_token, card_token, customer_id,
    pin_response, ip_address, email_address, card_address1, card_address2,
    card_city, card_state, card_postcode, card_country, card_number, card_type,
    pin_response_text";

fn row_to_transaction(row: &Row) -> rusqlite::Result<PinTransaction> {
    Ok(PinTransaction {
        id: row.get(0)?,
        date: Some(timestamp_column(row, 1)?),
        environment: row.get(2)?,
        amount: decimal_column(row, 3)?,
        fees: decimal_column(row, 4)?,
        description: row.get(5)?,
        processed: row.get(6)?,
        succeeded: row.get(7)?,
        currency: row.get(8)?,
        transaction_token: row.get(9)?,
        card_token: row.get(10)?,
        customer_id: row.get(11)?,
        pin_response: row.get(12)?,
        ip_address: row.get(13)?,
        email_address: row.get(14)?,
        card_address1: row.get(15)?,
        card_address2: row.get(16)?,
        card_city: row.get(17)?,
        card_state: row.get(18)?,
        card_postcode: row.get(19)?,
        card_country: row.get(20)?,
        card_number: row.get(21)?,
        card_type: scheme_column(row, 22)?,
        pin_response_text: row.get(23)?,
    })
}

/// Insert a transaction that has already passed `PinTransaction::validate`
pub fn insert_transaction(conn: &Connection, tx: &PinTransaction) -> Result<i64> {
    let date = tx.date.unwrap_or_else(Utc::now);

    conn.execute(
        "INSERT INTO pin_transactions (
            date, environment, amount, fees, description, processed, succeeded, currency,
            transaction_token, card_token, customer_id, pin_response, ip_address,
            email_address, card_address1, card_address2, card_city, card_state,
            card_postcode, card_country, card_number, card_type, pin_response_text
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
        params![
            date.to_rfc3339(),
            tx.environment,
            tx.amount.to_string(),
            tx.fees.to_string(),
            tx.description,
            tx.processed,
            tx.succeeded,
            tx.currency,
            tx.transaction_token,
            tx.card_token,
            tx.customer_id,
            tx.pin_response,
            tx.ip_address,
            tx.email_address,
            tx.card_address1,
            tx.card_address2,
            tx.card_city,
            tx.card_state,
            tx.card_postcode,
            tx.card_country,
            tx.card_number,
            tx.card_type.as_ref().map(|s| s.as_str()),
            tx.pin_response_text,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

pub fn update_transaction(conn: &Connection, tx_id: i64, tx: &PinTransaction) -> Result<()> {
    let date = tx.date.unwrap_or_else(Utc::now);

    conn.execute(
        "UPDATE pin_transactions SET
            date = ?1, environment = ?2, amount = ?3, fees = ?4, description = ?5,
            processed = ?6, succeeded = ?7, currency = ?8, transaction_token = ?9,
            card_token = ?10, customer_id = ?11, pin_response = ?12, ip_address = ?13,
            email_address = ?14, card_address1 = ?15, card_address2 = ?16, card_city = ?17,
            card_state = ?18, card_postcode = ?19, card_country = ?20, card_number = ?21,
            card_type = ?22, pin_response_text = ?23
         WHERE id = ?24",
        params![
            date.to_rfc3339(),
            tx.environment,
            tx.amount.to_string(),
            tx.fees.to_string(),
            tx.description,
            tx.processed,
            tx.succeeded,
            tx.currency,
            tx.transaction_token,
            tx.card_token,
            tx.customer_id,
            tx.pin_response,
            tx.ip_address,
            tx.email_address,
            tx.card_address1,
            tx.card_address2,
            tx.card_city,
            tx.card_state,
            tx.card_postcode,
            tx.card_country,
            tx.card_number,
            tx.card_type.as_ref().map(|s| s.as_str()),
            tx.pin_response_text,
            tx_id,
        ],
    )?;
    Ok(())
}

/// Flip `processed` from 0 to 1. Returns false when someone else already did.
pub fn claim_transaction(conn: &Connection, tx_id: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE pin_transactions SET processed = 1 WHERE id = ?1 AND processed = 0",
        [tx_id],
    )?;
    Ok(changed == 1)
}

pub fn get_transaction(conn: &Connection, tx_id: i64) -> Result<Option<PinTransaction>> {
    let sql = format!("SELECT {} FROM pin_transactions WHERE id = ?1", TRANSACTION_COLUMNS);
    Ok(conn.query_row(&sql, [tx_id], row_to_transaction).optional()?)
}

/// All transactions, newest first
pub fn get_all_transactions(conn: &Connection) -> Result<Vec<PinTransaction>> {
    let sql = format!(
        "SELECT {} FROM pin_transactions ORDER BY date DESC, id DESC",
        TRANSACTION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;

    let transactions = stmt
        .query_map([], row_to_transaction)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(transactions)
}

pub fn count_transactions(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM pin_transactions", [], |row| row.get(0))?;
    Ok(count)
}

/// Write every transaction as CSV, newest first. Returns the row count.
pub fn export_transactions_csv<W: Write>(conn: &Connection, writer: W) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        "id",
        "date",
        "environment",
        "amount",
        "fees",
        "currency",
        "processed",
        "succeeded",
        "transaction_token",
        "pin_response",
    ])?;

    let transactions = get_all_transactions(conn)?;
    for tx in &transactions {
        wtr.write_record([
            tx.id.map(|id| id.to_string()).unwrap_or_default(),
            tx.date.map(|d| d.to_rfc3339()).unwrap_or_default(),
            tx.environment.clone(),
            tx.amount.to_string(),
            tx.fees.to_string(),
            tx.currency.clone(),
            tx.processed.to_string(),
            tx.succeeded.to_string(),
            tx.transaction_token.clone().unwrap_or_default(),
            tx.pin_response.clone().unwrap_or_default(),
        ])?;
    }

    wtr.flush()?;
    Ok(transactions.len())
}

// ============================================================================
// BANK ACCOUNTS & RECIPIENTS
// ============================================================================

pub fn insert_bank_account(conn: &Connection, account: &BankAccount) -> Result<i64> {
    conn.execute(
        "INSERT INTO bank_accounts (token, bank_name, branch, name, bsb, number, environment)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            account.token,
            account.bank_name,
            account.branch,
            account.name,
            account.bsb,
            account.number,
            account.environment,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

pub fn get_bank_account(conn: &Connection, account_id: i64) -> Result<Option<BankAccount>> {
    Ok(conn
        .query_row(
            "SELECT id, token, bank_name, branch, name, bsb, number, environment
             FROM bank_accounts WHERE id = ?1",
            [account_id],
            |row| {
                Ok(BankAccount {
                    id: row.get(0)?,
                    token: row.get(1)?,
                    bank_name: row.get(2)?,
                    branch: row.get(3)?,
                    name: row.get(4)?,
                    bsb: row.get(5)?,
                    number: row.get(6)?,
                    environment: row.get(7)?,
                })
            },
        )
        .optional()?)
}

fn row_to_recipient(row: &Row) -> rusqlite::Result<PinRecipient> {
    Ok(PinRecipient {
        id: row.get(0)?,
        token: row.get(1)?,
        email: row.get(2)?,
        name: row.get(3)?,
        created: timestamp_column(row, 4)?,
        bank_account_id: row.get(5)?,
        environment: row.get(6)?,
    })
}

pub fn insert_recipient(conn: &Connection, recipient: &PinRecipient) -> Result<i64> {
    conn.execute(
        "INSERT INTO pin_recipients (token, email, name, created, bank_account_id, environment)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            recipient.token,
            recipient.email,
            recipient.name,
            recipient.created.to_rfc3339(),
            recipient.bank_account_id,
            recipient.environment,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

pub fn get_recipient(conn: &Connection, recipient_id: i64) -> Result<Option<PinRecipient>> {
    Ok(conn
        .query_row(
            "SELECT id, token, email, name, created, bank_account_id, environment
             FROM pin_recipients WHERE id = ?1",
            [recipient_id],
            row_to_recipient,
        )
        .optional()?)
}

pub fn get_recipient_by_token(conn: &Connection, token: &str) -> Result<Option<PinRecipient>> {
    Ok(conn
        .query_row(
            "SELECT id, token, email, name, created, bank_account_id, environment
             FROM pin_recipients WHERE token = ?1 ORDER BY id DESC LIMIT 1",
            [token],
            row_to_recipient,
        )
        .optional()?)
}

// ============================================================================
// TRANSFERS
// ============================================================================

fn row_to_transfer(row: &Row) -> rusqlite::Result<PinTransfer> {
    Ok(PinTransfer {
        id: row.get(0)?,
        transfer_token: row.get(1)?,
        status: row.get(2)?,
        currency: row.get(3)?,
        description: row.get(4)?,
        amount: row.get(5)?,
        recipient_id: row.get(6)?,
        created: timestamp_column(row, 7)?,
        pin_response_text: row.get(8)?,
    })
}

pub fn insert_transfer(conn: &Connection, transfer: &PinTransfer) -> Result<i64> {
    conn.execute(
        "INSERT INTO pin_transfers (
            transfer_token, status, currency, description, amount, recipient_id,
            created, pin_response_text
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            transfer.transfer_token,
            transfer.status,
            transfer.currency,
            transfer.description,
            transfer.amount,
            transfer.recipient_id,
            transfer.created.to_rfc3339(),
            transfer.pin_response_text,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

pub fn get_transfer(conn: &Connection, transfer_id: i64) -> Result<Option<PinTransfer>> {
    Ok(conn
        .query_row(
            "SELECT id, transfer_token, status, currency, description, amount,
                    recipient_id, created, pin_response_text
             FROM pin_transfers WHERE id = ?1",
            [transfer_id],
            row_to_transfer,
        )
        .optional()?)
}

pub fn get_transfers_for_recipient(conn: &Connection, recipient_id: i64) -> Result<Vec<PinTransfer>> {
    let mut stmt = conn.prepare(
        "SELECT id, transfer_token, status, currency, description, amount,
                recipient_id, created, pin_response_text
         FROM pin_transfers WHERE recipient_id = ?1
         ORDER BY created DESC, id DESC",
    )?;

    let transfers = stmt
        .query_map([recipient_id], row_to_transfer)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(transfers)
}

pub fn count_transfers(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM pin_transfers", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// EVENTS
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: timestamp_column(row, 1)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| conversion_error(5, e))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(events)
}
