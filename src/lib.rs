pub mod clock;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod scheduler;
pub mod services;
pub mod state;
pub mod store;
