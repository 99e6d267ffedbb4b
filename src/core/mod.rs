pub mod attachment;
pub mod cascade;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod history;
pub mod mode;
pub mod provider;
