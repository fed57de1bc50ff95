use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("broker timeout: {0}")]
    Timeout(String),

    #[error("broker disconnected: {0}")]
    Disconnected(String),

    #[error("order rejected by broker: {0}")]
    Rejected(String),

    #[error("invalid order request: {0}")]
    InvalidRequest(String),

    #[error("broker event channel closed")]
    ChannelClosed,
}

impl BrokerError {
    /// Transport failures, as opposed to a definitive refusal.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Disconnected(_) | Self::ChannelClosed)
    }
}
