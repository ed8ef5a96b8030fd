use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use harvest_core::error::HarvestError;

/// A domain error on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub HarvestError);

pub type ApiResult<T> = Result<Json<T>, ApiError>;

impl From<HarvestError> for ApiError {
    fn from(err: HarvestError) -> Self {
        ApiError(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError(HarvestError::Store(err))
    }
}

pub fn status_for(err: &HarvestError) -> StatusCode {
    match err {
        HarvestError::InvalidTransition { .. } | HarvestError::Validation(_) => StatusCode::BAD_REQUEST,
        HarvestError::Forbidden(_) => StatusCode::FORBIDDEN,
        HarvestError::NotFound { .. } => StatusCode::NOT_FOUND,
        HarvestError::StoreConflict { .. } => StatusCode::CONFLICT,
        HarvestError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Text safe to show a client. Store failures are not described.
pub fn public_message(err: &HarvestError) -> String {
    match err {
        HarvestError::Store(_) => "Internal server error".to_string(),
        other => other.to_string(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!("Request failed: {:#}", self.0);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self.0);
        }
        (status, Json(serde_json::json!({ "message": public_message(&self.0) }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::types::DonationStatus;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        let id = Uuid::new_v4();
        let cases = [
            (
                HarvestError::InvalidTransition {
                    event: "accept",
                    status: DonationStatus::Accepted,
                },
                StatusCode::BAD_REQUEST,
            ),
            (HarvestError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (HarvestError::forbidden("no"), StatusCode::FORBIDDEN),
            (HarvestError::not_found("donation", id), StatusCode::NOT_FOUND),
            (HarvestError::StoreConflict { id }, StatusCode::CONFLICT),
            (
                HarvestError::Store(anyhow::anyhow!("connection reset")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(status_for(&err), expected, "{}", err);
        }
    }

    #[tokio::test]
    async fn test_store_errors_are_not_leaked() {
        let response = ApiError::from(anyhow::anyhow!("password authentication failed")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "Internal server error");
    }
}
