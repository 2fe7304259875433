// 💳 Card Token - a card stored at Pin, referenced locally by token
//
// Created once from a gateway response. Only `primary` changes afterwards.

use crate::error::{PinError, Result};
use crate::wire::CardData;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// CARD SCHEME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardScheme {
    Master,
    Visa,
    AmericanExpress,
    /// Anything else Pin reports, kept verbatim
    Other(String),
}

impl CardScheme {
    /// Parse the scheme string used on the wire ("master", "visa", ...)
    pub fn from_pin(scheme: &str) -> Self {
        match scheme.to_lowercase().as_str() {
            "master" | "mastercard" => CardScheme::Master,
            "visa" => CardScheme::Visa,
            "american_express" | "amex" => CardScheme::AmericanExpress,
            _ => CardScheme::Other(scheme.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CardScheme::Master => "master",
            CardScheme::Visa => "visa",
            CardScheme::AmericanExpress => "american_express",
            CardScheme::Other(s) => s,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            CardScheme::Master => "Mastercard",
            CardScheme::Visa => "Visa",
            CardScheme::AmericanExpress => "American Express",
            CardScheme::Other(s) => s,
        }
    }
}

// ============================================================================
// CARD TOKEN
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardToken {
    /// Row id, `None` until persisted
    pub id: Option<i64>,
    pub environment: String,
    pub token: String,
    pub scheme: Option<CardScheme>,
    pub name: Option<String>,
    pub display_number: Option<String>,
    pub expiry_month: Option<u32>,
    pub expiry_year: Option<i32>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub address_city: Option<String>,
    pub address_state: Option<String>,
    pub address_postcode: Option<String>,
    pub address_country: Option<String>,
    /// Customer's primary card
    pub primary: bool,
    pub created: DateTime<Utc>,
}

impl CardToken {
    pub fn new(token: &str, environment: &str) -> Self {
        CardToken {
            id: None,
            environment: environment.to_string(),
            token: token.to_string(),
            scheme: None,
            name: None,
            display_number: None,
            expiry_month: None,
            expiry_year: None,
            address_line1: None,
            address_line2: None,
            address_city: None,
            address_state: None,
            address_postcode: None,
            address_country: None,
            primary: false,
            created: Utc::now(),
        }
    }

    /// Build from the `card` object of a customer or charge response
    pub fn from_pin_data(data: &CardData, environment: &str) -> Result<Self> {
        let token = data
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PinError::Invalid("card response has no token".to_string()))?;

        let mut card = CardToken::new(token, environment);
        card.scheme = data.scheme.as_deref().map(CardScheme::from_pin);
        card.name = data.name.clone();
        card.display_number = data.display_number.clone();
        card.expiry_month = data.expiry_month;
        card.expiry_year = data.expiry_year;
        card.address_line1 = data.address_line1.clone();
        card.address_line2 = data.address_line2.clone();
        card.address_city = data.address_city.clone();
        card.address_state = data.address_state.clone();
        card.address_postcode = data.address_postcode.clone();
        card.address_country = data.address_country.clone();
        card.primary = data.primary.unwrap_or(false);
        Ok(card)
    }

    /// "MM/YYYY", or empty when either part is unknown
    pub fn expiry_str(&self) -> String {
        match (self.expiry_month, self.expiry_year) {
            (Some(month), Some(year)) => format!("{:02}/{}", month, year),
            _ => String::new(),
        }
    }

    /// A card is expired from the first day of the month after its expiry month
    pub fn has_expired(&self, today: NaiveDate) -> bool {
        let (month, year) = match (self.expiry_month, self.expiry_year) {
            (Some(m), Some(y)) if (1..=12).contains(&m) => (m, y),
            _ => return false,
        };

        let first_expired_day = if month < 12 {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        };

        match first_expired_day {
            Some(day) => today >= day,
            None => false,
        }
    }
}

impl std::fmt::Display for CardToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token)
    }
}
