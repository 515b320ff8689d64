//! Plain text interpreter and the sensitive data handlers.

use anyhow::Result;

use super::{card::CardMatcher, Handler, Interpreter};
use crate::{
    core::events::Message,
    events::{EventMetadata, EventTag},
};

/// Default minimum ratio of printable bytes for a message to be text.
pub(crate) const DEFAULT_PLAINTEXT_THRESHOLD: f64 = 0.70;

const CARD_INFO_KEYWORDS: &[&str] = &[
    "credit",
    "debit",
    "card",
    "cvv",
    "cvc",
    "expiration",
    "expiry",
    "cardholder",
    "security",
];

const PAYMENT_SERVICE_KEYWORDS: &[&str] =
    &["paypal", "stripe", "pay", "visa", "mastercard", "amex", "discover"];

const TRANSACTION_KEYWORDS: &[&str] = &[
    "checkout",
    "order",
    "purchase",
    "invoice",
    "billing",
    "shipping",
    "statement",
    "merchant",
    "transaction",
    "payment",
    "amount",
    "currency",
];

const ADDRESS_KEYWORDS: &[&str] = &[
    "address",
    "billing",
    "shipping",
    "country",
    "city",
    "state",
    "zip",
    "postal",
    "street",
    "avenue",
    "boulevard",
    "blvd",
    "road",
    "drive",
    "lane",
    "court",
    "apartment",
    "suite",
    "ste",
    "unit",
    "building",
    "bldg",
    "floor",
    "house",
    "office",
    "town",
    "village",
    "county",
    "province",
    "region",
    "district",
];

fn is_text_byte(b: u8) -> bool {
    b.is_ascii_graphic() || matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0c)
}

/// Ratio of printable and whitespace bytes.
pub(crate) fn printable_ratio(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().filter(|b| is_text_byte(**b)).count() as f64 / data.len() as f64
}

/// Accepts messages made mostly of text. The output is the lower-cased
/// content.
pub(crate) struct PlaintextInterpreter {
    threshold: f64,
}

impl PlaintextInterpreter {
    pub(crate) fn new(threshold: f64) -> PlaintextInterpreter {
        PlaintextInterpreter { threshold }
    }
}

impl Interpreter for PlaintextInterpreter {
    type Output = String;

    fn name(&self) -> &'static str {
        "plaintext"
    }

    fn parse(&self, msg: &Message) -> Option<String> {
        if msg.data.is_empty() || printable_ratio(&msg.data) < self.threshold {
            return None;
        }
        Some(String::from_utf8_lossy(&msg.data).to_lowercase())
    }
}

/// Tags text containing payment card numbers.
pub(crate) struct CardNumberHandler {
    matcher: CardMatcher,
}

impl CardNumberHandler {
    pub(crate) fn new() -> Result<CardNumberHandler> {
        Ok(CardNumberHandler {
            matcher: CardMatcher::new()?,
        })
    }
}

impl Handler<String> for CardNumberHandler {
    fn name(&self) -> &'static str {
        "card-number"
    }

    fn handle(&self, _: &Message, text: &String, metadata: &mut EventMetadata) -> Result<()> {
        if self.matcher.find(text).next().is_some() {
            metadata.add_tag(EventTag::Pci);
        }
        Ok(())
    }
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

/// Tags text using payment vocabulary.
pub(crate) struct PaymentKeywordsHandler;

impl Handler<String> for PaymentKeywordsHandler {
    fn name(&self) -> &'static str {
        "payment-keywords"
    }

    fn handle(&self, _: &Message, text: &String, metadata: &mut EventMetadata) -> Result<()> {
        if [CARD_INFO_KEYWORDS, PAYMENT_SERVICE_KEYWORDS, TRANSACTION_KEYWORDS]
            .iter()
            .any(|keywords| contains_any(text, keywords))
        {
            metadata.add_tag(EventTag::Pci);
        }
        Ok(())
    }
}

/// Tags text looking like a postal address.
pub(crate) struct AddressKeywordsHandler;

impl Handler<String> for AddressKeywordsHandler {
    fn name(&self) -> &'static str {
        "address-keywords"
    }

    fn handle(&self, _: &Message, text: &String, metadata: &mut EventMetadata) -> Result<()> {
        if contains_any(text, ADDRESS_KEYWORDS) {
            metadata.add_tag(EventTag::Pii);
        }
        Ok(())
    }
}
