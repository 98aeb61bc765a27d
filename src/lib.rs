pub mod config;
pub mod engine;
pub mod host;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod outbox;
pub mod pump;
pub mod store;
