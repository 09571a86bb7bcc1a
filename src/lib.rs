pub mod channels;
pub mod config;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod models;
pub mod store;
pub mod utils;
