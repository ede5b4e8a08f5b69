pub mod admin_config;
pub mod config_cache;
pub mod holidays;
pub mod lifecycle;
pub mod notify;
pub mod validator;
