pub mod arithmetic;
pub mod types;

pub use arithmetic::{
    address_count, calculate_address_range, calculate_subnet, combine_suffix, range_to_cidr,
    AddressRange, Cidr, SubnetSpec,
};
pub use types::{classify_update, Prefix, ReceiverEvent, SourceTag};
