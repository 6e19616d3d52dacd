//! Pagination metadata for list endpoints

use serde::{Deserialize, Serialize};

/// Pagination block returned alongside paginated collections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u32,
}

impl Pagination {
    /// Build pagination metadata from a page request and a total count.
    ///
    /// `pages` is the ceiling of `total / limit`; an empty collection
    /// still reports one page so clients always have a valid range.
    pub fn new(page: u32, limit: u32, total: u64) -> Self {
        let limit = limit.max(1);
        let pages = ((total + limit as u64 - 1) / limit as u64).max(1) as u32;
        Self {
            page,
            limit,
            total,
            pages,
        }
    }
}
