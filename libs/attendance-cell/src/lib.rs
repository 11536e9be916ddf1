pub mod error;
pub mod models;
pub mod ports;
pub mod services;

pub use error::*;
pub use models::*;
pub use ports::*;
pub use services::polling::PollingController;
