//! Testing utilities and mock implementations
//!
//! Lets the device runtime run against scripted broker traffic and fixed
//! sensor readings, without a network.

pub mod mocks;

pub use mocks::*;
