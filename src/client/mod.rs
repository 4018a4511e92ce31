//! Front-end side of the demo: a traced HTTP client for the items API.

pub mod items;

pub use items::{ClientError, ItemsClient, NewItem};
