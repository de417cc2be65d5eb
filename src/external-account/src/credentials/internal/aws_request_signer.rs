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

//! Signs requests using [AWS Signature Version 4].
//!
//! The signed request is never sent. Its URL, method, headers, and body are
//! serialized as the subject token, and the token endpoint replays it to AWS
//! STS to verify the caller identity.
//!
//! [AWS Signature Version 4]: https://docs.aws.amazon.com/IAM/latest/UserGuide/reference_sigv.html

use crate::Result;
use crate::errors::{self, CredentialsError};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub(crate) const X_AMZ_DATE: &str = "x-amz-date";
pub(crate) const X_AMZ_SECURITY_TOKEN: &str = "x-amz-security-token";

/// Every byte except the unreserved characters and `/` is encoded.
static AWS_URI_ENCODE_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Every byte except the unreserved characters is encoded.
static AWS_QUERY_ENCODE_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Temporary or long-lived AWS credentials.
#[derive(Clone, PartialEq)]
pub(crate) struct AwsSecurityCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsSecurityCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSecurityCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[censored]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[censored]"))
            .finish()
    }
}

/// The result of signing a request.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct AwsSignedRequest {
    pub url: String,
    pub method: String,
    /// The signed headers, keyed by lowercase name.
    pub headers: BTreeMap<String, String>,
    /// The value of the `Authorization` header.
    pub authorization: String,
    pub body: String,
}

#[derive(Debug)]
pub(crate) struct AwsRequestSigner<'a> {
    credentials: &'a AwsSecurityCredentials,
    region: &'a str,
    service: &'a str,
}

impl<'a> AwsRequestSigner<'a> {
    pub(crate) fn new(
        credentials: &'a AwsSecurityCredentials,
        region: &'a str,
        service: &'a str,
    ) -> Self {
        Self {
            credentials,
            region,
            service,
        }
    }

    /// Signs a request made at `now`.
    ///
    /// The `host`, `x-amz-date` and (if the credentials have one)
    /// `x-amz-security-token` headers are added to `additional_headers` and
    /// signed along with them.
    pub(crate) fn sign(
        &self,
        method: &str,
        url: &str,
        additional_headers: &[(&str, &str)],
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<AwsSignedRequest> {
        let parsed = url::Url::parse(url).map_err(errors::non_retryable)?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_string(),
            (None, _) => {
                return Err(CredentialsError::from_msg(
                    false,
                    format!("cannot sign request, the URL <{url}> has no host"),
                ));
            }
        };

        let mut headers = BTreeMap::new();
        for (k, v) in additional_headers {
            headers.insert(k.to_ascii_lowercase(), v.trim().to_string());
        }
        headers.insert("host".to_string(), host);
        headers.insert(X_AMZ_DATE.to_string(), format_iso8601(now));
        if let Some(token) = &self.credentials.session_token {
            headers.insert(X_AMZ_SECURITY_TOKEN.to_string(), token.clone());
        }

        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
        let canonical_request =
            canonical_request_string(method, &parsed, &headers, &signed_headers, body)?;
        tracing::debug!("calculated canonical request for AWS signature");

        // Scope: "20220313/<region>/<service>/aws4_request"
        let scope = format!(
            "{}/{}/{}/aws4_request",
            format_date(now),
            self.region,
            self.service
        );
        let string_to_sign = format!(
            "{ALGORITHM}\n{}\n{scope}\n{}",
            format_iso8601(now),
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = generate_signing_key(
            &self.credentials.secret_access_key,
            now,
            self.region,
            self.service,
        )?;
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

        let authorization = format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.credentials.access_key_id,
        );

        Ok(AwsSignedRequest {
            url: url.to_string(),
            method: method.to_string(),
            headers,
            authorization,
            body: body.to_string(),
        })
    }
}

fn canonical_request_string(
    method: &str,
    url: &url::Url,
    headers: &BTreeMap<String, String>,
    signed_headers: &str,
    body: &str,
) -> Result<String> {
    let mut f = String::with_capacity(256);
    writeln!(f, "{method}").map_err(errors::non_retryable)?;

    let path = percent_decode_str(url.path())
        .decode_utf8()
        .map_err(errors::non_retryable)?;
    let path = if path.is_empty() { "/".into() } else { path };
    writeln!(f, "{}", utf8_percent_encode(&path, &AWS_URI_ENCODE_SET)).map_err(errors::non_retryable)?;

    let mut query = url
        .query_pairs()
        .map(|(k, v)| {
            (
                utf8_percent_encode(&k, &AWS_QUERY_ENCODE_SET).to_string(),
                utf8_percent_encode(&v, &AWS_QUERY_ENCODE_SET).to_string(),
            )
        })
        .collect::<Vec<_>>();
    query.sort();
    let query = query
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    writeln!(f, "{query}").map_err(errors::non_retryable)?;

    for (name, value) in headers {
        writeln!(f, "{name}:{value}").map_err(errors::non_retryable)?;
    }
    writeln!(f).map_err(errors::non_retryable)?;
    writeln!(f, "{signed_headers}").map_err(errors::non_retryable)?;
    write!(f, "{}", hex_sha256(body.as_bytes())).map_err(errors::non_retryable)?;
    Ok(f)
}

fn generate_signing_key(
    secret: &str,
    time: DateTime<Utc>,
    region: &str,
    service: &str,
) -> Result<Vec<u8>> {
    let secret = format!("AWS4{secret}");
    let sign_date = hmac_sha256(secret.as_bytes(), format_date(time).as_bytes())?;
    let sign_region = hmac_sha256(&sign_date, region.as_bytes())?;
    let sign_service = hmac_sha256(&sign_region, service.as_bytes())?;
    hmac_sha256(&sign_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], content: &[u8]) -> Result<Vec<u8>> {
    let mut h = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|_| CredentialsError::from_msg(false, "invalid HMAC key length"))?;
    h.update(content);
    Ok(h.finalize().into_bytes().to_vec())
}

fn hex_sha256(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

fn format_date(t: DateTime<Utc>) -> String {
    t.format("%Y%m%d").to_string()
}

fn format_iso8601(t: DateTime<Utc>) -> String {
    t.format("%Y%m%dT%H%M%SZ").to_string()
}
