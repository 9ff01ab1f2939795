use chrono::{DateTime, Utc};

/// Transport metadata of one webhook delivery.
///
/// Inserted by [`crate::middleware::delivery_context_middleware`]; never part
/// of the job identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryContext {
    delivery_id: Option<String>,
    received_at: DateTime<Utc>,
}

impl DeliveryContext {
    pub fn new(delivery_id: Option<String>, received_at: DateTime<Utc>) -> Self {
        let delivery_id = delivery_id
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        Self {
            delivery_id,
            received_at,
        }
    }

    pub fn delivery_id(&self) -> Option<&str> {
        self.delivery_id.as_deref()
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}
