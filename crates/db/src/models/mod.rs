pub mod app;
pub mod delivery;
pub mod delivery_job;
pub mod endpoint;
pub mod event;

use serde::Serialize;

/// One page of a listing. `has_next` is computed by fetching one row past
/// the requested limit.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_next: bool,
}

impl<T> Page<T> {
    /// Build a page from a `limit + 1` fetch.
    pub fn from_overfetch(mut rows: Vec<T>, limit: i64) -> Self {
        let has_next = rows.len() as i64 > limit;
        rows.truncate(limit as usize);
        Self {
            items: rows,
            has_next,
        }
    }
}
