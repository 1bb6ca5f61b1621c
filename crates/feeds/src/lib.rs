//! Price source adapters for the aggregation engine.
//!
//! This crate provides the concrete feeds behind the
//! [`sentinel_oracle::PriceSourceAdapter`] seam:
//! - HTTP JSON price APIs
//! - A deterministic simulated feed for demos and soak testing

mod http;
mod sim;

pub use http::HttpPriceSource;
pub use sim::SimulatedPriceSource;
