//! btleplug radio backend.
//!
//! This module implements [`RadioStack`](crate::radio::RadioStack) on top of
//! the host Bluetooth stack via btleplug.

pub mod characteristics;
pub mod properties;
pub mod radio;
pub mod scanner;

pub use radio::BtleplugRadio;
