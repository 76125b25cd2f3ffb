pub mod admission;
pub mod ai_gateway;
pub mod cli;
pub mod config;
pub mod directive;
pub mod logging;
pub mod moderation;
pub mod server;
