//! Management protocols for reaching peripherals through a bridge device.

pub mod pololu;

pub use pololu::PololuAdapter;
