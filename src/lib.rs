pub mod config;
pub mod error;
pub mod executor;
pub mod platform;
pub mod prompts;
pub mod workflow;
pub mod workspace;
