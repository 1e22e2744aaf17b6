//! # Course Store
//!
//! A reactive client-side store for a course catalogue: one network fetch
//! becomes a cancelable, retried, multicast stream of state that any number of
//! consumers can attach to, with optimistic local edits.
//!
//! ## Core Concepts
//!
//! - **Sources**: Lazy, cancelable streams of values ending in completion or
//!   an error ([`Source`], [`Attachment`])
//! - **Stages**: `debug`, `retry_with_delay`, `share` and friends, each
//!   returning a new source
//! - **Store**: The authoritative course collection, replayed to every
//!   consumer, with derived selectors and optimistic `save`
//! - **Transport**: The boundary to the backend ([`Transport`]), with an
//!   in-memory implementation and an optional `reqwest` one
//!
//! ## Example
//!
//! ```ignore
//! use course_store::{CourseChanges, CourseId, Category, Store, StoreConfig};
//!
//! let store = Store::new(transport, StoreConfig::default());
//! store.init();
//!
//! // Every attachment sees the current collection right away
//! let mut beginners = store.select_by_category(Category::Beginner).attach();
//!
//! // Published locally before the PUT is sent
//! let persisted = store.save(CourseId(1), &CourseChanges::new().description("X"))?;
//! persisted.attach().completion().await?;
//! ```

pub mod api;
pub mod error;
pub mod search;
pub mod source;
pub mod store;
pub mod transport;
pub mod types;

// Re-exports
pub use api::CourseApi;
pub use error::{Result, StoreError};
pub use search::{LessonSearch, DEFAULT_QUIET_PERIOD};
pub use source::{
    Attachment, Emission, LogConfig, LogLevel, Publisher, RetryPolicy, SharePolicy, Source,
};
pub use store::{Store, StoreConfig, StoreState};
pub use transport::{MemoryTransport, Method, Reply, Request, Response, Transport};
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use types::*;
