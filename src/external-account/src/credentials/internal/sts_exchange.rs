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
use crate::constants::{ACCESS_TOKEN_TYPE, TOKEN_EXCHANGE_GRANT_TYPE};
use crate::errors::{self, CredentialsError, OAuthError};
use crate::transport::HttpTransport;
use base64::Engine;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Handles OAuth2 Secure Token Service (STS) exchange.
/// Reference: https://datatracker.ietf.org/doc/html/rfc8693
pub(crate) struct STSHandler;

impl STSHandler {
    /// Performs an oauth2 token exchange with the provided [ExchangeTokenRequest] information.
    pub(crate) async fn exchange_token(
        transport: &dyn HttpTransport,
        req: ExchangeTokenRequest,
    ) -> Result<TokenResponse> {
        // The serializer is not `Send`, it must be dropped before any await.
        let body = {
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            form.append_pair("grant_type", TOKEN_EXCHANGE_GRANT_TYPE)
                .append_pair("requested_token_type", ACCESS_TOKEN_TYPE)
                .append_pair("subject_token", &req.subject_token)
                .append_pair("subject_token_type", &req.subject_token_type);
            if !req.scope.is_empty() {
                form.append_pair("scope", &req.scope.join(" "));
            }
            if let Some(audience) = &req.audience {
                form.append_pair("audience", audience);
            }
            if let Some(options) = &req.extra_options {
                form.append_pair("options", &options.to_string());
            }
            form.finish()
        };

        let builder = http::Request::builder()
            .method(http::Method::POST)
            .uri(&req.url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE);
        let builder = match req.authentication.basic_auth_header()? {
            Some(value) => builder.header(AUTHORIZATION, value),
            None => builder,
        };
        let request = builder
            .body(Bytes::from(body))
            .map_err(errors::non_retryable)?;

        tracing::debug!(url = %req.url, "exchanging subject token");
        let response = transport.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            let err = OAuthError::from_response(status, response.body());
            tracing::debug!("token exchange failed: {err}");
            return Err(CredentialsError::protocol(err));
        }

        serde_json::from_slice::<TokenResponse>(response.body()).map_err(errors::non_retryable)
    }
}

/// TokenResponse is used to decode the remote server response during
/// an oauth2 token exchange.
#[derive(Deserialize, PartialEq, Debug)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub issued_token_type: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// ClientAuthentication represents an OAuth client ID and secret, sent
/// using HTTP Basic authentication as stated in
/// https://datatracker.ietf.org/doc/html/rfc6749#section-2.3.1.
#[derive(Clone, Debug, Default)]
pub(crate) struct ClientAuthentication {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl ClientAuthentication {
    fn basic_auth_header(&self) -> Result<Option<http::HeaderValue>> {
        let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret)
        else {
            return Ok(None);
        };
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{client_id}:{client_secret}"));
        let mut value = http::HeaderValue::from_str(&format!("Basic {encoded}"))
            .map_err(errors::non_retryable)?;
        value.set_sensitive(true);
        Ok(Some(value))
    }
}

/// Information required to perform an oauth2 token exchange with the provided endpoint.
#[derive(Debug, Default)]
pub(crate) struct ExchangeTokenRequest {
    pub url: String,
    pub authentication: ClientAuthentication,
    pub subject_token: String,
    pub subject_token_type: String,
    pub audience: Option<String>,
    pub scope: Vec<String>,
    pub extra_options: Option<Value>,
}
