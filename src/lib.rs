//! Cross-venue arbitrage engine core library.
//!
//! Exposes the shared model layer, error taxonomy, the durable log client,
//! venue adapters, the depth-curve sizer, the similarity matcher, the
//! persistence layer, and the chunked executor, used by the stage binaries
//! under `src/bin/`.

pub mod arbitrage;
pub mod error;
pub mod executor;
pub mod llm;
pub mod log;
pub mod models;
pub mod persistence;
pub mod reconciler;
pub mod similarity;
pub mod venues;
