pub mod config;
pub mod history;
pub mod ids;
pub mod logging;
pub mod models;
pub mod store;

