// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::errors::{self, CredentialsError, OAuthError};
use crate::headers_util::build_headers;
use crate::token::Token;
use crate::transport::HttpTransport;
use crate::{BuildResult, Result, build_errors::Error as BuilderError};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;

pub(crate) const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);
const MIN_LIFETIME_SECONDS: u64 = 600;
const MAX_LIFETIME_SECONDS: u64 = 43200;

/// Returns the impersonated token lifetime for the configured value.
pub(crate) fn lifetime(token_lifetime_seconds: Option<u64>) -> BuildResult<Duration> {
    match token_lifetime_seconds {
        None => Ok(DEFAULT_LIFETIME),
        Some(s) if (MIN_LIFETIME_SECONDS..=MAX_LIFETIME_SECONDS).contains(&s) => {
            Ok(Duration::from_secs(s))
        }
        Some(s) => Err(BuilderError::parsing(format!(
            "token_lifetime_seconds must be between {MIN_LIFETIME_SECONDS} and {MAX_LIFETIME_SECONDS}, got {s}"
        ))),
    }
}

/// Extracts the service account from an impersonation URL.
///
/// The principal is the last path segment, without any `:verb` suffix. It
/// must look like an email address or follow a `serviceAccounts` segment.
pub(crate) fn target_principal(impersonation_url: &str) -> Option<String> {
    let url = url::Url::parse(impersonation_url).ok()?;
    let segments: Vec<&str> = url.path_segments()?.collect();
    let (last, parents) = segments.split_last()?;
    let principal = last.split(':').next().unwrap_or_default();
    let principal = percent_encoding::percent_decode_str(principal)
        .decode_utf8()
        .ok()?
        .into_owned();
    if principal.is_empty() {
        return None;
    }
    let under_service_accounts = parents.last() == Some(&"serviceAccounts");
    (principal.contains('@') || under_service_accounts).then_some(principal)
}

#[derive(Serialize, Debug, PartialEq)]
struct GenerateAccessTokenRequest<'a> {
    scope: &'a [String],
    lifetime: String,
}

#[derive(Deserialize)]
struct GenerateAccessTokenResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "expireTime")]
    expire_time: String,
}

/// Exchanges `access_token` for a token belonging to the service account
/// named in `impersonation_url`.
pub(crate) async fn generate_access_token(
    transport: &dyn HttpTransport,
    access_token: &Token,
    impersonation_url: &str,
    scopes: &[String],
    lifetime: Duration,
) -> Result<Token> {
    let body = GenerateAccessTokenRequest {
        scope: scopes,
        lifetime: format!("{}s", lifetime.as_secs()),
    };
    let body = serde_json::to_vec(&body).map_err(errors::non_retryable)?;

    let mut request = http::Request::builder()
        .method(http::Method::POST)
        .uri(impersonation_url)
        .header(CONTENT_TYPE, "application/json")
        .body(Bytes::from(body))
        .map_err(errors::non_retryable)?;
    request
        .headers_mut()
        .extend(build_headers(access_token, None)?);

    tracing::debug!(url = impersonation_url, "impersonating service account");
    let response = transport.send(request).await?;
    let status = response.status();
    if !status.is_success() {
        let err = OAuthError::from_response(status, response.body());
        tracing::debug!("service account impersonation failed: {err}");
        return Err(CredentialsError::protocol(err));
    }

    let token_response = serde_json::from_slice::<GenerateAccessTokenResponse>(response.body())
        .map_err(errors::non_retryable)?;
    let expire_time = OffsetDateTime::parse(
        &token_response.expire_time,
        &time::format_description::well_known::Rfc3339,
    )
    .map_err(errors::non_retryable)?;
    let remaining: Duration = (expire_time - OffsetDateTime::now_utc())
        .try_into()
        .unwrap_or(Duration::ZERO);

    Ok(Token {
        token: token_response.access_token,
        token_type: "Bearer".to_string(),
        expires_at: Some(Instant::now() + remaining),
        metadata: None,
    })
}
