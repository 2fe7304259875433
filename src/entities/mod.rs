// Entity Models
//
// Each entity is a persisted record plus the gateway flows that create or
// change it. Rows are written through `crate::db`; every gateway round trip
// leaves an `Event` in the audit trail.

pub mod card;
pub mod customer;
pub mod transaction;
pub mod recipient;
pub mod transfer;

pub use card::{CardScheme, CardToken};
pub use customer::CustomerToken;
pub use transaction::{PinTransaction, DEFAULT_CURRENCY};
pub use recipient::{BankAccount, PinRecipient};
pub use transfer::PinTransfer;
