//! Items service.
//!
//! # Data Flow
//! ```text
//! /api/items request
//!     → handlers.rs (parse id/body, open operation span)
//!     → store.rs (simulated latency, RwLock-guarded Vec<Item>)
//!     → JSON response or ApiError
//! ```

pub mod handlers;
pub mod store;

pub use store::{Item, ItemFields, ItemStore};
