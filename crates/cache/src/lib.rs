//! Render cache for folio documents.
//!
//! Bounded, index-aware cache of rasterized pages with single-flight
//! rendering and LRU eviction.

pub mod index;
pub mod render_cache;

pub use index::IndexChange;
pub use render_cache::{
    CacheStats, Lookup, PageBuffer, PendingRender, RenderCache, RenderClaim, RenderError,
    RenderKey,
};
