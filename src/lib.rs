#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![doc = include_str!("../README.md")]

pub mod addressing;
pub mod dpt;
pub mod error;
pub mod protocol;

#[cfg(feature = "std")]
pub mod discovery;
#[cfg(feature = "std")]
pub mod relay;
#[cfg(feature = "std")]
pub mod tunnel;

// Macro modules (must be declared before use)
#[macro_use]
pub mod macros;
#[macro_use]
pub mod logging;

// Re-export commonly used types
#[doc(inline)]
pub use addressing::{GroupAddress, IndividualAddress};
#[doc(inline)]
pub use dpt::{decode_datapoint, encode_datapoint, DptRole, DptValue};
#[doc(inline)]
pub use error::{KnxError, Result};
#[doc(inline)]
pub use protocol::cemi::{CemiFrame, Operation};

#[cfg(feature = "std")]
#[doc(inline)]
pub use discovery::{discover_gateway, probe_gateway, GatewayInfo};
#[cfg(feature = "std")]
#[doc(inline)]
pub use relay::{IpRelay, RelayConfig};
#[cfg(feature = "std")]
#[doc(inline)]
pub use tunnel::{TunnelClient, TunnelConfig, TunnelEvent};
