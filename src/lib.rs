//! Competition client for the Prism investor challenge.
//!
//! Fetches an investor brief from the challenge server, turns it into a profile,
//! prices a small fixed stock universe and submits a risk-bucketed portfolio.

pub mod app;
pub mod client;
pub mod config;
pub mod investor;
pub mod logging;
pub mod portfolio;
pub mod stocks;

#[cfg(test)]
mod test_support;
