//! Drivers for the sensors on the adapter's I2C bus.

pub mod mcp9808;
pub mod rm3100;

pub use mcp9808::Mcp9808;
pub use rm3100::Rm3100;
