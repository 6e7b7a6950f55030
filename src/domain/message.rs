use super::dedup::DedupKey;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Tags an item with the keys the core needs. How the keys were derived
/// (content sniffing, message metadata, ...) is up to the implementor.
pub trait Classified {
    fn message_id(&self) -> &str;
    fn dedup_key(&self) -> DedupKey;
    fn correlation_key(&self) -> &str;
}

/// A payment message that upstream classification already tagged.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PaymentMessage {
    pub message_id: String,
    /// Business identifier, e.g. the `InstrId` of a credit transfer.
    pub identifier: String,
    pub identifier_type: String,
    pub correlation_key: String,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

impl Classified for PaymentMessage {
    fn message_id(&self) -> &str {
        &self.message_id
    }

    fn dedup_key(&self) -> DedupKey {
        DedupKey::new(self.identifier.clone(), self.identifier_type.clone())
    }

    fn correlation_key(&self) -> &str {
        &self.correlation_key
    }
}
