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

use crate::build_errors::Error as BuilderError;
use crate::credentials::internal::aws_request_signer::{
    AwsRequestSigner, AwsSecurityCredentials, AwsSignedRequest,
};
use crate::credentials::subject_token::{Builder as SubjectTokenBuilder, SubjectToken};
use crate::errors::{self, CredentialsError};
use crate::transport::HttpTransport;
use crate::{BuildResult, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const AWS_REGION: &str = "AWS_REGION";
const AWS_DEFAULT_REGION: &str = "AWS_DEFAULT_REGION";
const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
const AWS_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";

const IMDSV2_TOKEN_HEADER: &str = "x-aws-ec2-metadata-token";
const IMDSV2_TOKEN_TTL_HEADER: &str = "x-aws-ec2-metadata-token-ttl-seconds";
const IMDSV2_TOKEN_TTL_SECONDS: &str = "300";
const TARGET_RESOURCE_HEADER: &str = "x-goog-cloud-target-resource";
const REGION_PLACEHOLDER: &str = "{region}";
const SUPPORTED_VERSION: u32 = 1;

const MSG: &str = "failed to retrieve AWS subject token";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub(crate) struct AwsConfig {
    pub environment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub regional_cred_verification_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imdsv2_session_token_url: Option<String>,
}

impl AwsConfig {
    pub(crate) fn validate(&self) -> BuildResult<()> {
        let Some(version) = self.environment_id.strip_prefix("aws") else {
            return Err(BuilderError::parsing(format!(
                "invalid AWS environment ID <{}>",
                self.environment_id
            )));
        };
        match version.parse::<u32>() {
            Ok(SUPPORTED_VERSION) => Ok(()),
            _ => Err(BuilderError::parsing(format!(
                "AWS version <{version}> is not supported"
            ))),
        }
    }
}

/// The subject token format expected by the token endpoint.
#[derive(Serialize, Debug)]
struct AwsTokenRequest<'a> {
    url: &'a str,
    method: &'a str,
    headers: Vec<AwsTokenHeader<'a>>,
    body: &'a str,
}

#[derive(Serialize, Debug)]
struct AwsTokenHeader<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetadataCredentials {
    access_key_id: String,
    secret_access_key: String,
    token: Option<String>,
}

/// Builds a signed AWS `GetCallerIdentity` request and uses it as the
/// subject token.
///
/// The region and security credentials come from the environment when
/// available, and from the EC2 instance metadata server otherwise.
#[derive(Debug, Clone)]
pub struct AwsSourcedCredentials {
    config: AwsConfig,
    audience: String,
    transport: Arc<dyn HttpTransport>,
}

impl AwsSourcedCredentials {
    pub(crate) fn new(config: AwsConfig, audience: String, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            config,
            audience,
            transport,
        }
    }

    /// The AWS environment identifier, e.g. `aws1`.
    pub fn environment_id(&self) -> &str {
        &self.config.environment_id
    }

    /// The URL of the regional `GetCallerIdentity` endpoint.
    ///
    /// Contains a `{region}` placeholder, replaced when the token is created.
    pub fn regional_cred_verification_url(&self) -> &str {
        &self.config.regional_cred_verification_url
    }

    pub(crate) async fn subject_token(&self) -> Result<SubjectToken> {
        let env_region = region_from_env();
        let env_credentials = credentials_from_env();

        // The session token is only needed if the metadata server is used.
        let session_token = match (
            &self.config.imdsv2_session_token_url,
            &env_region,
            &env_credentials,
        ) {
            (Some(url), None, _) | (Some(url), _, None) => {
                Some(self.imdsv2_session_token(url).await?)
            }
            _ => None,
        };
        let session_token = session_token.as_deref();

        let region = match env_region {
            Some(r) => r,
            None => self.region_from_metadata(session_token).await?,
        };
        let credentials = match env_credentials {
            Some(c) => c,
            None => self.credentials_from_metadata(session_token).await?,
        };

        self.signed_subject_token(&region, &credentials, Utc::now())
    }

    fn signed_subject_token(
        &self,
        region: &str,
        credentials: &AwsSecurityCredentials,
        now: DateTime<Utc>,
    ) -> Result<SubjectToken> {
        let url = self
            .config
            .regional_cred_verification_url
            .replace(REGION_PLACEHOLDER, region);
        let service = url::Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().and_then(|h| h.split('.').next()).map(str::to_string))
            .unwrap_or_else(|| "sts".to_string());

        let signed = AwsRequestSigner::new(credentials, region, &service).sign(
            "POST",
            &url,
            &[(TARGET_RESOURCE_HEADER, self.audience.as_str())],
            "",
            now,
        )?;
        tracing::debug!(region, "signed AWS GetCallerIdentity request");
        Ok(SubjectTokenBuilder::new(encode_token(&signed)?).build())
    }

    async fn imdsv2_session_token(&self, url: &str) -> Result<String> {
        tracing::debug!("requesting AWS IMDSv2 session token");
        let request = http::Request::builder()
            .method(http::Method::PUT)
            .uri(url)
            .header(IMDSV2_TOKEN_TTL_HEADER, IMDSV2_TOKEN_TTL_SECONDS)
            .body(Bytes::new())
            .map_err(errors::non_retryable)?;
        let token = self
            .fetch(request, "failed to retrieve the IMDSv2 session token")
            .await?;
        Ok(token.trim().to_string())
    }

    async fn region_from_metadata(&self, session_token: Option<&str>) -> Result<String> {
        let Some(url) = &self.config.region_url else {
            return Err(CredentialsError::from_msg(
                false,
                format!("{MSG}, unable to determine the AWS region, `region_url` is not configured"),
            ));
        };
        tracing::debug!("requesting AWS region from metadata server");
        let zone = self
            .fetch(self.metadata_request(url, session_token)?, "failed to retrieve the AWS region")
            .await?;
        // The response is an availability zone, e.g. `us-east-2b`.
        let mut region = zone.trim().to_string();
        region.pop();
        if region.is_empty() {
            return Err(CredentialsError::from_msg(
                false,
                format!("{MSG}, invalid availability zone <{zone}>"),
            ));
        }
        Ok(region)
    }

    async fn credentials_from_metadata(
        &self,
        session_token: Option<&str>,
    ) -> Result<AwsSecurityCredentials> {
        let Some(url) = &self.config.url else {
            return Err(CredentialsError::from_msg(
                false,
                format!("{MSG}, unable to determine the AWS credentials, `url` is not configured"),
            ));
        };
        tracing::debug!("requesting AWS role name from metadata server");
        let role = self
            .fetch(
                self.metadata_request(url, session_token)?,
                "failed to retrieve the AWS role name",
            )
            .await?;
        let role = role.trim();
        if role.is_empty() {
            return Err(CredentialsError::from_msg(
                false,
                format!("{MSG}, the metadata server returned an empty role name"),
            ));
        }

        tracing::debug!(role, "requesting AWS security credentials from metadata server");
        let role_url = format!("{}/{role}", url.trim_end_matches('/'));
        let body = self
            .fetch(
                self.metadata_request(&role_url, session_token)?,
                "failed to retrieve the AWS security credentials",
            )
            .await?;
        let credentials: MetadataCredentials =
            serde_json::from_str(&body).map_err(errors::non_retryable)?;
        Ok(AwsSecurityCredentials {
            access_key_id: credentials.access_key_id,
            secret_access_key: credentials.secret_access_key,
            session_token: credentials.token,
        })
    }

    fn metadata_request(
        &self,
        url: &str,
        session_token: Option<&str>,
    ) -> Result<http::Request<Bytes>> {
        let builder = http::Request::builder().method(http::Method::GET).uri(url);
        let builder = match session_token {
            Some(token) => builder.header(IMDSV2_TOKEN_HEADER, token),
            None => builder,
        };
        builder.body(Bytes::new()).map_err(errors::non_retryable)
    }

    async fn fetch(&self, request: http::Request<Bytes>, msg: &str) -> Result<String> {
        let response = self.transport.send(request).await?;
        if !response.status().is_success() {
            return Err(errors::from_http_response(&response, msg));
        }
        String::from_utf8(response.body().to_vec()).map_err(errors::non_retryable)
    }
}

fn encode_token(signed: &AwsSignedRequest) -> Result<String> {
    let headers = std::iter::once(AwsTokenHeader {
        key: "Authorization",
        value: &signed.authorization,
    })
    .chain(signed.headers.iter().map(|(key, value)| AwsTokenHeader { key, value }))
    .collect();
    let request = AwsTokenRequest {
        url: &signed.url,
        method: &signed.method,
        headers,
        body: &signed.body,
    };
    let json = serde_json::to_string(&request).map_err(errors::non_retryable)?;
    Ok(url::form_urlencoded::byte_serialize(json.as_bytes()).collect())
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn region_from_env() -> Option<String> {
    non_empty_env(AWS_REGION).or_else(|| non_empty_env(AWS_DEFAULT_REGION))
}

fn credentials_from_env() -> Option<AwsSecurityCredentials> {
    Some(AwsSecurityCredentials {
        access_key_id: non_empty_env(AWS_ACCESS_KEY_ID)?,
        secret_access_key: non_empty_env(AWS_SECRET_ACCESS_KEY)?,
        session_token: non_empty_env(AWS_SESSION_TOKEN),
    })
}
