//! Output caching for tool calls.
//!
//! Tool results are memoized by a content [`fingerprint`] of the tool name
//! and its arguments, so argument order and incidental whitespace do not
//! cause spurious misses. Every result passes through the
//! [`OutputOptimizer`] before it is stored or returned, and the bytes it
//! removes are tracked as a running counter.
//!
//! # Example
//!
//! ```
//! use cache::{CacheConfig, OutputCache, Payload};
//! use serde_json::json;
//!
//! let cache = OutputCache::new(CacheConfig::default());
//! let args = json!({"path": "src", "recursive": true});
//!
//! assert!(cache.lookup("filesystem", &args).is_none());
//! cache.store("filesystem", &args, Payload::Text("main.rs\nlib.rs\n".into()));
//!
//! let reordered = json!({"recursive": true, "path": "src"});
//! let hit = cache.lookup("filesystem", &reordered).unwrap();
//! assert_eq!(hit.payload.as_text(), Some("main.rs\nlib.rs\n"));
//! assert_eq!(cache.stats().hits, 1);
//! ```

mod cache;
mod fingerprint;
mod optimizer;

pub use cache::{CacheConfig, CacheEntry, CacheStats, OutputCache};
pub use fingerprint::{canonicalize, fingerprint};
pub use optimizer::{OutputOptimizer, Payload, Reduced, TRUNCATION_MARKER};
