pub mod constants;
pub mod supervisor;
pub mod transport;
pub mod types;
