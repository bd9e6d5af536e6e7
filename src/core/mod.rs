pub mod agent;
pub mod ports;
