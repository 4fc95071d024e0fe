pub mod ble;
pub mod connection;
pub mod constants;
pub mod driver;
pub mod manager;
pub mod types;
