/// Request body and query extractors, and response shorthands
///
/// Bodies are read as raw bytes and decoded here so that malformed JSON
/// is answered with the error envelope instead of axum's plain-text
/// rejection. Query strings get the same treatment.
use crate::error::{ApiError, ErrorCode};
use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};

/// JSON request body
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|_| ApiError::Code(ErrorCode::MalformedJson))?;

        serde_json::from_slice(&bytes).map(JsonBody).map_err(|e| {
            tracing::debug!("JsonBody: rejecting body: {}", e);
            ApiError::Code(ErrorCode::MalformedJson)
        })
    }
}

/// Query string parameters
#[derive(Debug, Clone)]
pub struct Params<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for Params<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::try_from_uri(&parts.uri)
            .map(|Query(params)| Params(params))
            .map_err(|e| ApiError::detailed(ErrorCode::InvalidParameter, e.body_text()))
    }
}

/// 201 with a JSON body
pub fn created<T: Serialize>(value: T) -> Response {
    (StatusCode::CREATED, Json(value)).into_response()
}

/// 200 with a JSON body
pub fn ok<T: Serialize>(value: T) -> Response {
    Json(value).into_response()
}

pub fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

/// 204 for an empty list, 200 with the list otherwise
pub fn list<T: Serialize>(is_empty: bool, value: T) -> Response {
    if is_empty {
        no_content()
    } else {
        ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Body1 {
        name: String,
    }

    #[tokio::test]
    async fn test_malformed_json_is_enveloped() {
        let request = Request::builder().body(Body::from("{\"name\":")).unwrap();
        let error = JsonBody::<Body1>::from_request(request, &()).await.unwrap_err();
        assert!(error.is(ErrorCode::MalformedJson));

        let request = Request::builder().body(Body::from("{\"name\":\"ok\"}")).unwrap();
        let JsonBody(body) = JsonBody::<Body1>::from_request(request, &()).await.unwrap();
        assert_eq!(body.name, "ok");
    }

    #[test]
    fn test_empty_list_is_no_content() {
        assert_eq!(list(true, Vec::<u8>::new()).status(), StatusCode::NO_CONTENT);
        assert_eq!(list(false, vec![1u8]).status(), StatusCode::OK);
    }
}
