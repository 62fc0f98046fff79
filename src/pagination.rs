//! Page/page-size parsing for listing queries.
//!
//! # Example
//!
//! ```
//! use user_pipeline::pagination::{pagination_parameters, DEFAULT_PAGE_SIZE};
//!
//! let (params, query) = pagination_parameters("2", "").unwrap();
//! assert_eq!(query.page_size, DEFAULT_PAGE_SIZE);
//! assert_eq!(params.limit, 25);
//! assert_eq!(params.offset, 50);
//!
//! assert!(pagination_parameters("-1", "10").is_err());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PAGE_SIZE: u64 = 25;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PaginationError {
    #[error("can not parse page")]
    InvalidPage,
    #[error("can not parse page_size")]
    InvalidPageSize,
    #[error("invalid pagination parameters provided")]
    Negative,
    #[error("page offset out of range")]
    OffsetOverflow,
}

/// Page as requested by the caller (0-indexed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationQuery {
    pub page: u64,
    pub page_size: u64,
}

/// SQL-facing limit/offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationParams {
    pub limit: u64,
    pub offset: u64,
}

/// Pagination block of a listing response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(flatten)]
    pub query: PaginationQuery,
    pub total_records: u64,
    #[serde(rename = "total_page")]
    pub total_pages: u64,
}

/// Parse raw `page` / `page_size` strings. Empty strings mean 0; a page size of
/// 0 falls back to [`DEFAULT_PAGE_SIZE`].
pub fn pagination_parameters(
    page: &str,
    page_size: &str,
) -> Result<(PaginationParams, PaginationQuery), PaginationError> {
    let page = parse_or_zero(page).ok_or(PaginationError::InvalidPage)?;
    let page_size = parse_or_zero(page_size).ok_or(PaginationError::InvalidPageSize)?;

    if page < 0 || page_size < 0 {
        return Err(PaginationError::Negative);
    }

    let page = page as u64;
    let page_size = match page_size as u64 {
        0 => DEFAULT_PAGE_SIZE,
        n => n,
    };

    // the offset is rendered into SQL as a BIGINT
    let offset = page
        .checked_mul(page_size)
        .filter(|offset| *offset <= i64::MAX as u64)
        .ok_or(PaginationError::OffsetOverflow)?;

    let params = PaginationParams {
        limit: page_size,
        offset,
    };
    Ok((params, PaginationQuery { page, page_size }))
}

/// Build the response block for `total_records` rows.
pub fn paginated_response(query: PaginationQuery, total_records: u64) -> Pagination {
    let total_pages = if query.page_size == 0 {
        0
    } else {
        total_records.div_ceil(query.page_size)
    };
    Pagination {
        query,
        total_records,
        total_pages,
    }
}

fn parse_or_zero(s: &str) -> Option<i64> {
    if s.is_empty() {
        Some(0)
    } else {
        s.parse().ok()
    }
}
