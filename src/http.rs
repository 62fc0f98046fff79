//! HTTP read API.
//!
//! - `GET /users?page&page_size&sort=id:DESC&id:min&id:max` → `{data, pagination}`
//! - `GET /users/{id}` → `{data}`
//!
//! Error bodies are `{"error": "..."}` with fixed messages; internal error
//! detail is logged, never returned.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error};

use crate::entity::User;
use crate::filter::{Filter, SortOrder};
use crate::pagination::{paginated_response, pagination_parameters, Pagination};
use crate::service::{ServiceError, UserService};

/// Fields a listing may be sorted by.
pub const SORTABLE_FIELDS: &[&str] = &["id"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    InvalidPagination,
    InvalidFilter,
    InvalidUserId,
    UserNotFound,
    ListUsers,
    GetUser,
}

impl ApiError {
    fn status_and_message(self) -> (StatusCode, &'static str) {
        match self {
            Self::InvalidPagination => (
                StatusCode::BAD_REQUEST,
                "invalid pagination parameters provided",
            ),
            Self::InvalidFilter => (
                StatusCode::BAD_REQUEST,
                "invalid filter parameters provided",
            ),
            Self::InvalidUserId => (StatusCode::BAD_REQUEST, "invalid user id"),
            Self::UserNotFound => (StatusCode::NOT_FOUND, "user not found"),
            Self::ListUsers => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "error while fetching users data",
            ),
            Self::GetUser => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "error while fetching user by id",
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub data: Vec<User>,
    pub pagination: Pagination,
}

pub fn build_router(service: Arc<UserService>) -> Router {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/{id}", get(get_user))
        .with_state(service)
}

async fn list_users(
    State(service): State<Arc<UserService>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ListResponse>, ApiError> {
    let param = |name: &str| params.get(name).map(String::as_str).unwrap_or("");

    let (page, query) = pagination_parameters(param("page"), param("page_size"))
        .map_err(|_| ApiError::InvalidPagination)?;
    let filters = listing_filters(&params)?;

    let (users, total) = service.list_users(page, &filters).await.map_err(|e| {
        error!(error = %e, "Listing users failed");
        ApiError::ListUsers
    })?;

    Ok(Json(ListResponse {
        data: users,
        pagination: paginated_response(query, total),
    }))
}

async fn get_user(
    State(service): State<Arc<UserService>>,
    Path(id): Path<String>,
) -> Result<Json<DataResponse<User>>, ApiError> {
    let id: i64 = id.parse().map_err(|_| ApiError::InvalidUserId)?;

    match service.get_user(id).await {
        Ok(user) => Ok(Json(DataResponse { data: user })),
        Err(ServiceError::NotFound(_)) => Err(ApiError::UserNotFound),
        Err(e) => {
            error!(user_id = id, error = %e, "Fetching user failed");
            Err(ApiError::GetUser)
        }
    }
}

/// `sort=<field>:<ASC|DESC>` for allow-listed fields, plus an id range when
/// both `id:min` and `id:max` are given.
fn listing_filters(params: &HashMap<String, String>) -> Result<Vec<Filter>, ApiError> {
    let mut filters = Vec::new();

    if let Some(sort) = params.get("sort").filter(|s| !s.is_empty()) {
        let (field, order) = sort.split_once(':').unwrap_or((sort.as_str(), ""));
        if SORTABLE_FIELDS.contains(&field) {
            filters.push(Filter::sort(field, SortOrder::parse(order)));
        } else {
            debug!(field, "Ignoring sort on non-sortable field");
        }
    }

    if let (Some(min), Some(max)) = (params.get("id:min"), params.get("id:max")) {
        let min: i64 = min.parse().map_err(|_| ApiError::InvalidFilter)?;
        let max: i64 = max.parse().map_err(|_| ApiError::InvalidFilter)?;
        filters.push(Filter::gte("id", min));
        filters.push(Filter::lte("id", max));
    }

    Ok(filters)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_sort_allow_list() {
        let filters = listing_filters(&params(&[("sort", "id:DESC")])).unwrap();
        assert_eq!(filters, vec![Filter::sort("id", SortOrder::Desc)]);

        let filters = listing_filters(&params(&[("sort", "email:ASC")])).unwrap();
        assert!(filters.is_empty());
    }

    #[test]
    fn test_id_range_needs_both_bounds() {
        assert!(listing_filters(&params(&[("id:min", "5")])).unwrap().is_empty());

        let filters = listing_filters(&params(&[("id:min", "5"), ("id:max", "9")])).unwrap();
        assert_eq!(filters, vec![Filter::gte("id", 5), Filter::lte("id", 9)]);
    }

    #[test]
    fn test_non_numeric_range_rejected() {
        let err = listing_filters(&params(&[("id:min", "a"), ("id:max", "9")])).unwrap_err();
        assert_eq!(err, ApiError::InvalidFilter);
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(ApiError::InvalidUserId.into_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::UserNotFound.into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::GetUser.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
