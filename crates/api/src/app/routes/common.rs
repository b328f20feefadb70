//! Handler plumbing shared by every route module.

use std::str::FromStr;

use axum::{
    Json,
    extract::{Multipart, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::Value;

use stockroom_core::{DomainError, DomainResult, Page, UserId};
use stockroom_infra::import::UploadFormat;

use crate::app::dto::Summaries;
use crate::app::errors;
use crate::app::services::AppServices;

/// Handlers return the error response on the `Err` side so `?` short-circuits.
pub type ApiResult = Result<Response, Response>;

pub trait OrRespond<T> {
    fn or_respond(self) -> Result<T, Response>;
}

impl<T> OrRespond<T> for DomainResult<T> {
    fn or_respond(self) -> Result<T, Response> {
        self.map_err(errors::domain_error_to_response)
    }
}

/// Unwrap a JSON body, answering malformed input with the `{error}` envelope.
pub fn body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    body.map(|Json(value)| value)
        .map_err(|rejection| errors::json_error(StatusCode::BAD_REQUEST, rejection.body_text()))
}

pub fn parse_id<T>(raw: &str) -> Result<T, Response>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse().or_respond()
}

pub async fn render_one<T>(
    services: &AppServices,
    status: StatusCode,
    item: T,
    user_ids: Vec<UserId>,
    to_json: impl FnOnce(T, &Summaries) -> Value,
) -> ApiResult {
    let users = services.summaries(user_ids).await.or_respond()?;
    Ok((status, Json(to_json(item, &users))).into_response())
}

pub async fn render_page<T>(
    services: &AppServices,
    page: Page<T>,
    user_ids: Vec<UserId>,
    to_json: impl Fn(T, &Summaries) -> Value,
) -> ApiResult {
    let users = services.summaries(user_ids).await.or_respond()?;
    Ok((StatusCode::OK, Json(page.map(|item| to_json(item, &users)))).into_response())
}

/// Read the `file` part of a multipart upload as a CSV or XLSX sheet.
pub async fn sheet_upload(mut multipart: Multipart) -> Result<(UploadFormat, Vec<u8>), Response> {
    let bad_request = |msg: String| errors::json_error(StatusCode::BAD_REQUEST, msg);
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let format = UploadFormat::detect(field.file_name(), field.content_type()).or_respond()?;
        let bytes = field.bytes().await.map_err(|e| bad_request(e.body_text()))?;
        return Ok((format, bytes.to_vec()));
    }
    Err(bad_request("multipart field 'file' is required".to_string()))
}
