pub mod config;
pub mod reply;
