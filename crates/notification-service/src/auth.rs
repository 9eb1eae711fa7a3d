//! 调用方身份解析
//!
//! 身份由上游网关注入 `X-User-Username` 请求头；
//! 浏览器发起 WebSocket 升级时无法设置请求头，因此同时接受 `username` 查询参数。

use axum::extract::{FromRequestParts, Query};
use axum::http::Uri;
use axum::http::request::Parts;
use serde::Deserialize;

use crate::error::ServiceError;

pub const USER_HEADER: &str = "x-user-username";

/// WebSocket 升级请求携带的身份参数
#[derive(Debug, Deserialize)]
struct UserQuery {
    username: Option<String>,
}

/// 当前调用方用户名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser(pub String);

impl CurrentUser {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        from_header
            .or_else(|| username_from_query(&parts.uri))
            .map(CurrentUser)
            .ok_or_else(|| ServiceError::Unauthorized("缺少用户身份".to_string()))
    }
}

fn username_from_query(uri: &Uri) -> Option<String> {
    let Query(query) = Query::<UserQuery>::try_from_uri(uri).ok()?;
    query
        .username
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
