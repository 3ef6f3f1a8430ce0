pub mod acquisition;
pub mod anomaly;
pub mod config;
pub mod meter;
pub mod modbus;
pub mod reading;
pub mod store;

pub use config::*;
pub use reading::*;
