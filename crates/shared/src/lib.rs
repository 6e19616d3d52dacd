//! PropDesk Shared
//!
//! Infrastructure shared by the API server and the billing crate:
//! database pool construction and common response types.

pub mod db;
pub mod pagination;

pub use db::create_pool;
pub use pagination::Pagination;
