//! Paginated results.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query_builder::QueryBuilder;
use crate::rows::{PaginationMeta, ResultSet};
use crate::substrate::Substrate;

/// Pagination summary of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Total number of matching rows.
    pub total_items: i64,
    /// 1-based page number.
    pub current_page: u64,
    /// Rows per page; 0 when unlimited.
    pub per_page: u64,
    /// Number of pages.
    pub total_pages: u64,
    /// Whether a next page exists.
    pub has_next_page: bool,
    /// Whether a previous page exists.
    pub has_prev_page: bool,
    /// Number of the next page, if any.
    pub next_page: Option<u64>,
    /// Number of the previous page, if any.
    pub prev_page: Option<u64>,
}

impl From<&PaginationMeta> for Pagination {
    fn from(meta: &PaginationMeta) -> Self {
        let has_next_page = meta.current_page < meta.max_page;
        let has_prev_page = meta.current_page > 1;
        Self {
            total_items: meta.rows,
            current_page: meta.current_page,
            per_page: meta.limit,
            total_pages: meta.max_page,
            has_next_page,
            has_prev_page,
            next_page: has_next_page.then_some(meta.current_page + 1),
            prev_page: has_prev_page.then_some(meta.current_page - 1),
        }
    }
}

/// One page of results, able to fetch its neighbours.
#[derive(Debug)]
pub struct PaginatedRows<'db, S: Substrate> {
    query: QueryBuilder<'db, S>,
    rows: ResultSet,
    meta: PaginationMeta,
}

impl<'db, S: Substrate> PaginatedRows<'db, S> {
    pub(crate) fn new(query: QueryBuilder<'db, S>, rows: ResultSet, meta: PaginationMeta) -> Self {
        Self { query, rows, meta }
    }

    /// Returns the pagination summary.
    #[must_use]
    pub fn pagination(&self) -> Pagination {
        Pagination::from(&self.meta)
    }

    /// Returns the rows of this page.
    #[must_use]
    pub const fn rows(&self) -> &ResultSet {
        &self.rows
    }

    /// Consumes the page into its rows.
    #[must_use]
    pub fn into_rows(self) -> ResultSet {
        self.rows
    }

    /// Fetches the next page; `None` on the last page.
    ///
    /// # Errors
    ///
    /// Fails when the query fails.
    pub async fn next(&self) -> Result<Option<Self>> {
        match self.pagination().next_page {
            Some(page) => self.query.paginate(self.meta.limit, page).await.map(Some),
            None => Ok(None),
        }
    }

    /// Fetches the previous page; `None` on the first page.
    ///
    /// # Errors
    ///
    /// Fails when the query fails.
    pub async fn previous(&self) -> Result<Option<Self>> {
        match self.pagination().prev_page {
            Some(page) => self.query.paginate(self.meta.limit, page).await.map(Some),
            None => Ok(None),
        }
    }
}
