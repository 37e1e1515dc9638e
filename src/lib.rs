#![forbid(unsafe_code)]

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod extract;
pub mod formats;
pub mod graph;
pub mod http;
pub mod logging;
pub mod reconcile;
pub mod repository;
pub mod validate;

pub use error::{Error, Result};
