//! Response envelopes: single resources, pages, and pagination metadata.

use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::store::Page;

/// Query parameters for paginated list endpoints.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    /// Rows to skip.
    pub offset: Option<i64>,
    /// Page size (clamped server-side).
    pub limit: Option<i64>,
}

/// Wrap a single resource in the `{"data": ...}` envelope.
pub fn data<T: Serialize>(value: T) -> Json<serde_json::Value> {
    Json(json!({ "data": value }))
}

/// Wrap a page in the list envelope with pagination metadata.
pub fn paginated<T: Serialize>(page: Page<T>) -> Json<serde_json::Value> {
    let has_more = page.has_more();
    Json(json!({
        "data": page.items,
        "pagination": {
            "offset": page.offset,
            "limit": page.limit,
            "total": page.total,
            "has_more": has_more,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paginated_envelope_shape() {
        let page = Page {
            items: vec![1, 2, 3],
            offset: 0,
            limit: 3,
            total: 7,
        };
        let Json(body) = paginated(page);
        assert_eq!(body["data"], json!([1, 2, 3]));
        assert_eq!(body["pagination"]["total"], json!(7));
        assert_eq!(body["pagination"]["has_more"], json!(true));
    }

    #[test]
    fn test_data_envelope_shape() {
        let Json(body) = data(json!({"id": 1}));
        assert_eq!(body["data"]["id"], json!(1));
    }
}
