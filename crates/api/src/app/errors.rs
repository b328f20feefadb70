use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use stockroom_core::DomainError;

pub fn status_for(err: &DomainError) -> StatusCode {
    match err {
        DomainError::Validation(_)
        | DomainError::ValidationErrors(_)
        | DomainError::Conflict(_)
        | DomainError::DuplicateSku(_)
        | DomainError::InsufficientInventory { .. }
        | DomainError::ProductHasNoInventory(_)
        | DomainError::UserHasNoStore
        | DomainError::StoreHasNoCode(_)
        | DomainError::GrandTotalMismatch { .. } => StatusCode::BAD_REQUEST,
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::Authentication(_) => StatusCode::UNAUTHORIZED,
        DomainError::Forbidden(_) | DomainError::ProductNotInStore(_) => StatusCode::FORBIDDEN,
        DomainError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `{error}` for single failures, `{errors:[{field,message}]}` for field validation.
pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let status = status_for(&err);
    match err {
        DomainError::ValidationErrors(errors) => {
            (status, axum::Json(json!({ "errors": errors }))).into_response()
        }
        DomainError::Internal(detail) => {
            tracing::error!(error = %detail, "internal error");
            json_error(status, "internal server error")
        }
        other => json_error(status, other.to_string()),
    }
}

pub fn json_error(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (status, axum::Json(json!({ "error": message.into() }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use stockroom_core::{FieldError, ProductId};

    #[test]
    fn business_failures_are_bad_requests() {
        let cases = [
            DomainError::DuplicateSku("A".into()),
            DomainError::UserHasNoStore,
            DomainError::GrandTotalMismatch { client: Decimal::ONE, computed: Decimal::TWO },
            DomainError::InsufficientInventory {
                product_id: ProductId::new(),
                requested: Decimal::TWO,
                available: Decimal::ONE,
                missing: Decimal::ONE,
            },
        ];
        for err in &cases {
            assert_eq!(status_for(err), StatusCode::BAD_REQUEST, "{err}");
        }
        assert_eq!(status_for(&DomainError::ProductNotInStore(ProductId::new())), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&DomainError::authentication("x")), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn field_errors_use_the_errors_envelope() {
        let response = domain_error_to_response(DomainError::ValidationErrors(vec![FieldError::new(
            "name", "required",
        )]));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["errors"][0]["field"], "name");
    }
}
