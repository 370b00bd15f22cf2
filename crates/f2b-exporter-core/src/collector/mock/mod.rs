//! Mock control channel for testing without a running fail2ban server.

mod client;
mod scenarios;

pub use client::{MockClient, MockJail, MockQuery, MockSession};
