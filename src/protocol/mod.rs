//! KNXnet/IP protocol implementation.
//!
//! This module contains the core protocol structures and parsing logic:
//! the KNXnet/IP header and service bodies, the owned packet type, and
//! the cEMI telegram codec.

pub mod cemi;
pub mod constants;
pub mod frame;
pub mod packet;
pub mod services;

pub use cemi::*;
pub use constants::*;
pub use frame::*;
pub use packet::*;
pub use services::*;
