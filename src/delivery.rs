use crate::config::{DeliveryConfig, Platform};

/// How assistant replies reach the message store.
///
/// Picked once when a controller is built; the exchange path never looks at
/// the platform again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseDeliveryStrategy {
    /// Grow a placeholder message chunk by chunk
    Stream,
    /// One blocking call, one append
    SingleShot,
}

impl ResponseDeliveryStrategy {
    pub fn select(config: &DeliveryConfig) -> Self {
        match config.platform {
            Platform::Web => ResponseDeliveryStrategy::SingleShot,
            Platform::Native if config.streaming => ResponseDeliveryStrategy::Stream,
            Platform::Native => ResponseDeliveryStrategy::SingleShot,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, ResponseDeliveryStrategy::Stream)
    }
}
