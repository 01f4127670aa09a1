pub mod broker;
pub mod market_data;
pub mod notify;
pub mod observability;
pub mod persistence;
