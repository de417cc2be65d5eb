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

use crate::Result;
use crate::credentials::external_account::CredentialSourceFormat;
use crate::credentials::subject_token::SubjectToken;
use crate::errors;
use crate::transport::HttpTransport;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

/// Fetches the subject token from a local metadata endpoint.
#[derive(Debug, Clone)]
pub struct UrlSourcedCredentials {
    url: String,
    headers: HashMap<String, String>,
    format: CredentialSourceFormat,
    transport: Arc<dyn HttpTransport>,
}

const MSG: &str = "failed to request subject token";

impl UrlSourcedCredentials {
    pub(crate) fn new(
        url: String,
        headers: Option<HashMap<String, String>>,
        format: Option<CredentialSourceFormat>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            url,
            headers: headers.unwrap_or_default(),
            format: format.unwrap_or_default(),
            transport,
        }
    }

    /// The URL returning the subject token.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Additional headers sent with each request.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub(crate) async fn subject_token(&self) -> Result<SubjectToken> {
        tracing::debug!(url = %self.url, "requesting subject token from URL");
        let request = self
            .headers
            .iter()
            .fold(
                http::Request::builder()
                    .method(http::Method::GET)
                    .uri(&self.url),
                |r, (k, v)| r.header(k.as_str(), v.as_str()),
            )
            .body(Bytes::new())
            .map_err(errors::non_retryable)?;

        let response = self.transport.send(request).await?;
        if !response.status().is_success() {
            return Err(errors::from_http_response(&response, MSG));
        }

        let text = std::str::from_utf8(response.body()).map_err(errors::non_retryable)?;
        self.format.subject_token(text)
    }
}
