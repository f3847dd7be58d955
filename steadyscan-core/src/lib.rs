pub mod detection;
pub mod mapper;
pub mod pipeline;
pub mod tracking;
pub mod trigger;

// Re-export the top-level error type so callers only need `steadyscan_core::Error`
pub use anyhow::Error;
pub use anyhow::Result;
