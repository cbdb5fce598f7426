pub mod config;
pub mod consumer;
pub mod error;
pub mod resolver;
pub mod schema;
pub mod source;
pub mod store;
