//! Wire formats spoken by the relay
//!
//! - [`frame`]: the TCP envelope exchanged with relay clients
//! - [`dhcp`]: just enough DHCP to build and recognise probe traffic

pub mod dhcp;
pub mod frame;

pub use frame::{
    ClientCodec, RelayCodec, RelayMessage, RelayRequest, DEFAULT_MAX_PAYLOAD, HEADER_LEN,
};
