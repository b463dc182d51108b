use thiserror::Error;

/// Failures from the pure IPv6 prefix arithmetic in [`crate::prefix::arithmetic`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArithmeticError {
    #[error("subnet prefix length {requested} is shorter than parent prefix length {parent}")]
    SubnetTooShort { requested: u8, parent: u8 },

    #[error("subnet prefix length {0} exceeds 128")]
    SubnetLengthInvalid(u8),

    #[error("computed subnet at offset {offset} escapes parent {parent}")]
    SubnetOutsideParent { offset: u64, parent: String },

    #[error("suffix {0:?} is not a valid IPv6 address literal")]
    SuffixParse(String),

    #[error("range start {start} is greater than range end {end}")]
    RangeInverted { start: String, end: String },

    #[error("range endpoint {address} is not contained by parent {parent}")]
    RangeOutsideParent { address: String, parent: String },
}

/// Failures constructing or running a [`crate::receiver::Receiver`].
#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("no acquisition method configured")]
    NoAcquisitionConfigured,

    #[error("interface name is required for {0}")]
    MissingInterface(&'static str),

    #[error("failed to open socket: {0}")]
    Socket(#[source] std::io::Error),

    #[error("i/o error: {0}")]
    Io(#[source] std::io::Error),

    #[error("dhcpv6 protocol error: {0}")]
    Protocol(String),
}

/// Failures from the declarative store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resource {0:?} not found")]
    NotFound(String),

    #[error("optimistic concurrency conflict updating {0:?}")]
    Conflict(String),
}
