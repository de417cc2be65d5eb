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

//! The credentials reach the token endpoint, the impersonation endpoint, and
//! (for URL and AWS sourced credentials) metadata servers through an
//! [HttpTransport]. The transport is passed explicitly to the credentials
//! builder, there is no process-wide default to mutate.
//!
//! Most applications use the default [ReqwestTransport]. Tests and
//! applications with special networking requirements can provide their own
//! implementation.

use crate::Result;
use crate::constants::DEFAULT_HTTP_TIMEOUT;
use crate::errors::CredentialsError;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Sends HTTP requests on behalf of the credentials.
///
/// Implementations must bound each request by a timeout and report failures
/// to reach the remote endpoint using [CredentialsError::transport]. A
/// response with any HTTP status is a successful call, the credentials
/// interpret the status themselves.
#[async_trait::async_trait]
pub trait HttpTransport: std::fmt::Debug + Send + Sync {
    /// Sends `request` and returns the full response.
    async fn send(&self, request: http::Request<Bytes>) -> Result<http::Response<Bytes>>;
}

/// The default transport, based on [reqwest].
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Creates a transport with the default timeout.
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Creates a transport using an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Changes the timeout applied to each request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: http::Request<Bytes>) -> Result<http::Response<Bytes>> {
        let mut request = reqwest::Request::try_from(request)
            .map_err(|e| CredentialsError::transport(false, e))?;
        *request.timeout_mut() = Some(self.timeout);

        let response = self
            .client
            .execute(request)
            .await
            .map_err(from_reqwest_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(from_reqwest_error)?;

        let mut result = http::Response::new(body);
        *result.status_mut() = status;
        *result.headers_mut() = headers;
        Ok(result)
    }
}

fn from_reqwest_error(e: reqwest::Error) -> CredentialsError {
    let is_transient = e.is_timeout() || e.is_connect() || e.is_request() || e.is_body();
    CredentialsError::transport(is_transient, e)
}

pub(crate) fn default_transport() -> Arc<dyn HttpTransport> {
    Arc::new(ReqwestTransport::new())
}
