pub mod api;
pub mod config;
pub mod handlers;
pub mod ledger;
pub mod observability;
pub mod pipeline;
pub mod reading;
pub mod settings;
