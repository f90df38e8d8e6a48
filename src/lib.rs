//! Toolroom
//!
//! Tool inventory ledger: a catalog of physical tools plus a movement ledger
//! recording who took each tool, where, and when it came back.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod commands;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod repositories;
pub mod services;

pub use auth::{IdentityProvider, Principal};
pub use commands::Command;
pub use errors::ServiceError;
pub use services::AppServices;
