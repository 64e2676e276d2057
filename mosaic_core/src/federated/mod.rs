//! Federated search across provider instances.
//!
//! This module provides:
//! - `SearchQuery` / `SearchResult`: the request and the ranked, paginated answer
//! - `FanOut`: the raw, unranked outcome of one manager fan-out
//! - `Federator`: the entry point tying manager, ranking and filters together
//!
//! # Example
//!
//! ```ignore
//! use mosaic_core::federated::{Federator, SearchQuery};
//!
//! let federator = Federator::new(manager, types, ranking);
//! let page = federator.search(&SearchQuery::new("beach").with_type("file.media")).await?;
//! ```

mod engine;
mod types;

pub use engine::{Federator, FederatorConfig};
pub use types::{
    FanOut, SearchQuery, SearchResult, SourceFailure, DEFAULT_LIMIT, DEFAULT_TIMEOUT_MS, MAX_LIMIT,
};
