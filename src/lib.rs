// Pin Ledger - Core Library
// Local records of Pin Payments charges, customers, recipients and transfers,
// plus the flows that submit them to the gateway.

pub mod config;
pub mod db;
pub mod entities;
pub mod environment;
pub mod error;
pub mod gateway;
pub mod wire;

// Re-export commonly used types
pub use config::{EnvironmentConfig, PinConfig, DEFAULT_ENVIRONMENT};
pub use db::{
    Event,
    setup_database, insert_event, get_events_for_entity,
    get_transaction, get_all_transactions, count_transactions, export_transactions_csv,
    get_customer, get_customer_cards, get_recipient, get_recipient_by_token,
    get_transfer, get_transfers_for_recipient,
};
pub use entities::{
    BankAccount, CardScheme, CardToken, CustomerToken,
    PinRecipient, PinTransaction, PinTransfer,
};
pub use environment::{EnvironmentResolver, PinEnvironment};
pub use error::{PinError, Result};
pub use gateway::{
    Gateway, GatewayClient, GatewayReply, GatewayRequest, GatewayResponse,
    HttpTransport, Method, RawResponse, Transport,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
