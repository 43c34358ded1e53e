#![forbid(unsafe_code)]

pub mod accounts;
pub mod auth;
mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod export;
pub(crate) mod logging;

pub use cli::run;
