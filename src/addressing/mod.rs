//! KNX addressing system.
//!
//! KNX telegrams carry two kinds of addresses:
//! - Individual addresses for physical devices (Area.Line.Device)
//! - Group addresses for logical functions (Main/Middle/Sub or Main/Sub)

pub mod group;
pub mod individual;

pub use group::GroupAddress;
pub use individual::IndividualAddress;
