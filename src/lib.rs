//! Outbound value for a managed lightning wallet: an LNURL client for
//! auth, withdraw, channel and pay requests, and a planner for transactions
//! sweeping the whole on-chain balance.

pub mod config;
pub mod database;
pub mod ln;
pub mod lnurl;
pub mod sweep;
pub mod utils;

pub const CARGO_PKG_VERSION: Option<&'static str> = option_env!("CARGO_PKG_VERSION");
