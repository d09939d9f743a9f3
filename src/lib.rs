pub mod config;
pub mod drive;
pub mod error;
pub mod messages;
pub mod motor;
pub mod runtime;
