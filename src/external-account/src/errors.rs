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

//! Errors created while obtaining access tokens.
//!
//! Construction-time problems (a malformed configuration document, for
//! example) are reported as [crate::build_errors::Error] instead.

use bytes::Bytes;
use http::StatusCode;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter, Result};
use std::sync::Arc;

/// Represents an error using external account credentials.
///
/// The credentials may fail at several stages of a refresh: retrieving the
/// subject token from the external identity provider, reaching the token
/// endpoint, or having the token endpoint (or the impersonation endpoint)
/// reject the request. Use [is_subject_token][Self::is_subject_token],
/// [is_transport][Self::is_transport], and [is_protocol][Self::is_protocol]
/// to distinguish them.
///
/// # Example
/// ```
/// # use google_cloud_external_account::errors::CredentialsError;
/// let err = CredentialsError::from_msg(
///     true, "simulated retryable error while trying to create credentials");
/// assert!(err.is_transient());
/// assert!(format!("{err}").contains("simulated retryable error"));
/// ```
#[derive(Clone, Debug)]
pub struct CredentialsError {
    /// If `true`, the operation that resulted in this error might succeed
    /// upon retry.
    is_transient: bool,

    kind: ErrorKind,

    /// The underlying source of the error.
    source: CredentialsErrorImpl,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ErrorKind {
    SubjectToken,
    Protocol,
    Transport,
    Other,
}

#[derive(Clone, Debug)]
enum CredentialsErrorImpl {
    SimpleMessage(String),
    Source(Arc<dyn Error + Send + Sync>),
}

impl CredentialsError {
    /// Creates a new `CredentialsError` from a source error.
    ///
    /// # Arguments
    /// * `is_transient` - whether the operation may succeed if retried.
    /// * `source` - the underlying error that caused the failure.
    pub fn from_source<T: Error + Send + Sync + 'static>(is_transient: bool, source: T) -> Self {
        Self::with_kind(ErrorKind::Other, is_transient, source)
    }

    /// Creates a new `CredentialsError` from a message.
    ///
    /// # Arguments
    /// * `is_transient` - whether the operation may succeed if retried.
    /// * `message` - a description of the failure.
    pub fn from_msg<T: Into<String>>(is_transient: bool, message: T) -> Self {
        Self {
            is_transient,
            kind: ErrorKind::Other,
            source: CredentialsErrorImpl::SimpleMessage(message.into()),
        }
    }

    /// Creates an error representing a failure to reach a remote endpoint.
    ///
    /// Custom [HttpTransport][crate::transport::HttpTransport]
    /// implementations should use this constructor for connection failures,
    /// timeouts, and similar problems.
    pub fn transport<T: Error + Send + Sync + 'static>(is_transient: bool, source: T) -> Self {
        Self::with_kind(ErrorKind::Transport, is_transient, source)
    }

    pub(crate) fn protocol(source: OAuthError) -> Self {
        let is_transient = source
            .status()
            .map(is_retryable)
            .unwrap_or(false);
        Self::with_kind(ErrorKind::Protocol, is_transient, source)
    }

    fn with_kind<T: Error + Send + Sync + 'static>(
        kind: ErrorKind,
        is_transient: bool,
        source: T,
    ) -> Self {
        Self {
            is_transient,
            kind,
            source: CredentialsErrorImpl::Source(Arc::new(source)),
        }
    }

    /// Reclassifies any failure as a subject token retrieval failure.
    pub(crate) fn into_subject_token(self) -> Self {
        Self {
            kind: ErrorKind::SubjectToken,
            ..self
        }
    }

    /// Returns `true` if the error is transient and may be retried.
    pub fn is_transient(&self) -> bool {
        self.is_transient
    }

    /// The subject token could not be obtained from the credential source.
    pub fn is_subject_token(&self) -> bool {
        self.kind == ErrorKind::SubjectToken
    }

    /// The token or impersonation endpoint could not be reached.
    pub fn is_transport(&self) -> bool {
        self.kind == ErrorKind::Transport
    }

    /// The token or impersonation endpoint rejected the request.
    ///
    /// Use [oauth_error][Self::oauth_error] to inspect the details.
    pub fn is_protocol(&self) -> bool {
        self.kind == ErrorKind::Protocol
    }

    /// Returns the error returned by the token endpoint, if any.
    pub fn oauth_error(&self) -> Option<&OAuthError> {
        match &self.source {
            CredentialsErrorImpl::Source(source) => source.downcast_ref::<OAuthError>(),
            CredentialsErrorImpl::SimpleMessage(_) => None,
        }
    }
}

impl std::error::Error for CredentialsErrorImpl {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            CredentialsErrorImpl::SimpleMessage(_) => None,
            CredentialsErrorImpl::Source(source) => Some(source.as_ref()),
        }
    }
}

impl Display for CredentialsErrorImpl {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match &self {
            CredentialsErrorImpl::SimpleMessage(message) => write!(f, "{message}"),
            CredentialsErrorImpl::Source(source) => write!(f, "{source}"),
        }
    }
}

impl std::error::Error for CredentialsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.source()
    }
}

const RETRYABLE_MSG: &str = "but future attempts may succeed";
const NON_RETRYABLE_MSG: &str = "and future attempts will not succeed";

impl Display for CredentialsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let msg = if self.is_transient {
            RETRYABLE_MSG
        } else {
            NON_RETRYABLE_MSG
        };
        write!(
            f,
            "cannot create access token, {}, source:{}",
            msg, self.source
        )
    }
}

/// An error response from an OAuth 2.0 endpoint.
///
/// The fields are copied verbatim from the [RFC 6749 error response]. When
/// the response body cannot be interpreted, the error code is derived from
/// the HTTP status, e.g. `http_503`.
///
/// [RFC 6749 error response]: https://datatracker.ietf.org/doc/html/rfc6749#section-5.2
#[derive(Clone, Debug, PartialEq)]
pub struct OAuthError {
    status: Option<u16>,
    error_code: String,
    error_description: Option<String>,
    error_uri: Option<String>,
}

impl OAuthError {
    /// Creates a new error with the given code, description and URI.
    pub fn new<C, D, U>(error_code: C, error_description: Option<D>, error_uri: Option<U>) -> Self
    where
        C: Into<String>,
        D: Into<String>,
        U: Into<String>,
    {
        Self {
            status: None,
            error_code: error_code.into(),
            error_description: error_description.map(Into::into),
            error_uri: error_uri.map(Into::into),
        }
    }

    /// The `error` field of the response.
    pub fn error_code(&self) -> &str {
        &self.error_code
    }

    /// The `error_description` field of the response, if present.
    pub fn error_description(&self) -> Option<&str> {
        self.error_description.as_deref()
    }

    /// The `error_uri` field of the response, if present.
    pub fn error_uri(&self) -> Option<&str> {
        self.error_uri.as_deref()
    }

    /// The HTTP status of the response, if known.
    pub fn status(&self) -> Option<StatusCode> {
        self.status.and_then(|s| StatusCode::from_u16(s).ok())
    }

    /// Interprets an unsuccessful response from a token endpoint.
    ///
    /// Understands both RFC 6749 error bodies and the
    /// `{"error": {"code": ..., "message": ..., "status": ...}}` shape used
    /// by Google APIs.
    pub(crate) fn from_response(status: StatusCode, body: &Bytes) -> Self {
        let fallback = || {
            let text = String::from_utf8_lossy(body).trim().to_string();
            Self {
                status: Some(status.as_u16()),
                error_code: format!("http_{}", status.as_u16()),
                error_description: (!text.is_empty()).then_some(text),
                error_uri: None,
            }
        };
        let Ok(value) = serde_json::from_slice::<Value>(body) else {
            return fallback();
        };
        let field = |v: &Value, name: &str| v.get(name).and_then(Value::as_str).map(str::to_string);
        match value.get("error") {
            Some(Value::String(code)) => Self {
                status: Some(status.as_u16()),
                error_code: code.clone(),
                error_description: field(&value, "error_description"),
                error_uri: field(&value, "error_uri"),
            },
            Some(details @ Value::Object(_)) => Self {
                status: Some(status.as_u16()),
                error_code: field(details, "status")
                    .unwrap_or_else(|| format!("http_{}", status.as_u16())),
                error_description: field(details, "message"),
                error_uri: None,
            },
            _ => fallback(),
        }
    }
}

impl Display for OAuthError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "error=<{}>", self.error_code)?;
        if let Some(status) = self.status {
            write!(f, ", status={status}")?;
        }
        if let Some(description) = &self.error_description {
            write!(f, ", description=<{description}>")?;
        }
        if let Some(uri) = &self.error_uri {
            write!(f, ", uri=<{uri}>")?;
        }
        Ok(())
    }
}

impl std::error::Error for OAuthError {}

/// Errors returned by application-supplied subject token providers.
///
/// See [SubjectTokenProvider][crate::credentials::subject_token::SubjectTokenProvider].
pub trait SubjectTokenProviderError: Error + Send + Sync + 'static {
    /// Returns `true` if retrying the subject token retrieval may succeed.
    fn is_transient(&self) -> bool;
}

impl SubjectTokenProviderError for CredentialsError {
    fn is_transient(&self) -> bool {
        self.is_transient
    }
}

pub(crate) fn is_retryable(c: StatusCode) -> bool {
    match c {
        // Internal server errors do not indicate that there is anything wrong
        // with our request, so we retry them.
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS => true,
        _ => false,
    }
}

/// Creates an error for an unsuccessful response from a non-OAuth endpoint,
/// such as a metadata server or a subject token URL.
pub(crate) fn from_http_response(response: &http::Response<Bytes>, msg: &str) -> CredentialsError {
    let status = response.status();
    let body = String::from_utf8_lossy(response.body());
    CredentialsError::from_msg(
        is_retryable(status),
        format!("{msg}, failed with status {status}, body=<{body}>"),
    )
}

pub(crate) fn non_retryable<T: Error + Send + Sync + 'static>(source: T) -> CredentialsError {
    CredentialsError::from_source(false, source)
}
