pub mod client;
pub mod models;

pub use broker_trait::Broker;
pub use client::AlpacaClient;
pub use models::*;
