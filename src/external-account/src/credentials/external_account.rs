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

//! [External account] credentials, also known as Workload Identity
//! Federation.
//!
//! The configuration document is usually generated with
//! `gcloud iam workload-identity-pools create-cred-config`. It names a
//! [CredentialSource] for the subject token, the Security Token Service
//! endpoint, and optionally a service account to impersonate.
//!
//! [External account]: https://google.aip.dev/auth/4117

use super::external_account_sources::aws_sourced::AwsConfig;
use super::external_account_sources::executable_sourced::ExecutableConfig;
use super::internal::impersonation;
use super::internal::sts_exchange::{ClientAuthentication, ExchangeTokenRequest, STSHandler};
use super::subject_token::{Builder as SubjectTokenBuilder, SubjectToken, SubjectTokenProvider};
use crate::build_errors::Error as BuilderError;
use crate::constants::DEFAULT_SCOPE;
use crate::errors::CredentialsError;
use crate::headers_util::build_headers;
use crate::token::{Token, TokenProvider};
use crate::token_cache::TokenCache;
use crate::transport::{HttpTransport, ReqwestTransport, default_transport};
use crate::{BuildResult, Result};
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

pub use super::external_account_sources::aws_sourced::AwsSourcedCredentials;
pub use super::external_account_sources::executable_sourced::ExecutableSourcedCredentials;
pub use super::external_account_sources::file_sourced::FileSourcedCredentials;
pub use super::external_account_sources::programmatic_sourced::ProgrammaticSourcedCredentials;
pub use super::external_account_sources::url_sourced::UrlSourcedCredentials;

const TEXT_FORMAT: &str = "text";
const JSON_FORMAT: &str = "json";
const ISSUED_TOKEN_TYPE_KEY: &str = "issued_token_type";
const SCOPE_KEY: &str = "scope";

/// How to extract the subject token from a file or URL response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct CredentialSourceFormat {
    #[serde(rename = "type")]
    pub format_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_token_field_name: Option<String>,
}

impl Default for CredentialSourceFormat {
    fn default() -> Self {
        Self {
            format_type: TEXT_FORMAT.to_string(),
            subject_token_field_name: None,
        }
    }
}

impl CredentialSourceFormat {
    fn validate(&self) -> BuildResult<()> {
        match (self.format_type.as_str(), &self.subject_token_field_name) {
            (TEXT_FORMAT, _) => Ok(()),
            (JSON_FORMAT, Some(field)) if !field.is_empty() => Ok(()),
            (JSON_FORMAT, _) => Err(BuilderError::parsing(
                "the `json` format requires a `subject_token_field_name`",
            )),
            (other, _) => Err(BuilderError::parsing(format!(
                "unsupported credential source format <{other}>"
            ))),
        }
    }

    /// Extracts the subject token from `content`.
    pub(crate) fn subject_token(&self, content: &str) -> Result<SubjectToken> {
        let token = match (self.format_type.as_str(), &self.subject_token_field_name) {
            (JSON_FORMAT, Some(field)) => {
                let json = serde_json::from_str::<Value>(content)
                    .map_err(|e| CredentialsError::from_source(false, e))?;
                match json.get(field).and_then(Value::as_str) {
                    Some(token) => token.to_string(),
                    None => {
                        return Err(CredentialsError::from_msg(
                            false,
                            format!(
                                "failed to read subject token field `{field}` as string, body=<{json}>"
                            ),
                        ));
                    }
                }
            }
            _ => content.trim().to_string(),
        };
        if token.trim().is_empty() {
            return Err(CredentialsError::from_msg(false, "subject token is empty"));
        }
        Ok(SubjectTokenBuilder::new(token).build())
    }
}

/// A representation of a [external account config file].
///
/// [external account config file]: https://google.aip.dev/auth/4117#configuration-file-generation-and-usage
#[derive(Serialize, Deserialize, Debug)]
struct ExternalAccountFile {
    audience: String,
    subject_token_type: String,
    token_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_info_url: Option<String>,
    credential_source: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_account_impersonation_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_account_impersonation: Option<ServiceAccountImpersonationFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quota_project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scopes: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
struct ServiceAccountImpersonationFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    token_lifetime_seconds: Option<u64>,
}

#[derive(Deserialize)]
struct FileSourceFile {
    file: String,
    format: Option<CredentialSourceFormat>,
}

#[derive(Deserialize)]
struct UrlSourceFile {
    url: String,
    headers: Option<HashMap<String, String>>,
    format: Option<CredentialSourceFormat>,
}

#[derive(Deserialize)]
struct ExecutableSourceFile {
    executable: ExecutableConfig,
}

/// The values a credential source may need, beyond its own configuration.
struct SourceContext<'a> {
    audience: &'a str,
    subject_token_type: &'a str,
    service_account_email: Option<&'a str>,
    transport: &'a Arc<dyn HttpTransport>,
}

type SourceParser = fn(Value, &SourceContext<'_>) -> BuildResult<CredentialSource>;

// There is no discriminator field. The first matcher whose key is present
// in the `credential_source` object wins.
const SOURCE_MATCHERS: [(&str, SourceParser); 4] = [
    ("environment_id", aws_source),
    ("executable", executable_source),
    ("file", file_source),
    ("url", url_source),
];

fn parse_credential_source(value: Value, ctx: &SourceContext<'_>) -> BuildResult<CredentialSource> {
    let Some(map) = value.as_object() else {
        return Err(BuilderError::parsing("`credential_source` must be an object"));
    };
    let Some(parser) = SOURCE_MATCHERS
        .iter()
        .find(|(key, _)| map.contains_key(*key))
        .map(|(_, parser)| *parser)
    else {
        return Err(BuilderError::parsing(
            "`credential_source` does not match any supported credential source",
        ));
    };
    parser(value, ctx)
}

fn aws_source(value: Value, ctx: &SourceContext<'_>) -> BuildResult<CredentialSource> {
    let config: AwsConfig = serde_json::from_value(value).map_err(BuilderError::parsing)?;
    config.validate()?;
    Ok(CredentialSource::Aws(AwsSourcedCredentials::new(
        config,
        ctx.audience.to_string(),
        ctx.transport.clone(),
    )))
}

fn executable_source(value: Value, ctx: &SourceContext<'_>) -> BuildResult<CredentialSource> {
    let source: ExecutableSourceFile =
        serde_json::from_value(value).map_err(BuilderError::parsing)?;
    source.executable.validate()?;
    Ok(CredentialSource::Executable(
        ExecutableSourcedCredentials::new(
            source.executable,
            ctx.audience.to_string(),
            ctx.subject_token_type.to_string(),
            ctx.service_account_email.map(str::to_string),
        ),
    ))
}

fn file_source(value: Value, _ctx: &SourceContext<'_>) -> BuildResult<CredentialSource> {
    let source: FileSourceFile = serde_json::from_value(value).map_err(BuilderError::parsing)?;
    if let Some(format) = &source.format {
        format.validate()?;
    }
    Ok(CredentialSource::File(FileSourcedCredentials::new(
        source.file,
        source.format,
    )))
}

fn url_source(value: Value, ctx: &SourceContext<'_>) -> BuildResult<CredentialSource> {
    let source: UrlSourceFile = serde_json::from_value(value).map_err(BuilderError::parsing)?;
    if let Some(format) = &source.format {
        format.validate()?;
    }
    Ok(CredentialSource::Url(UrlSourcedCredentials::new(
        source.url,
        source.headers,
        source.format,
        ctx.transport.clone(),
    )))
}

/// Where the credentials obtain the subject token.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CredentialSource {
    /// Read from a file, see [FileSourcedCredentials].
    File(FileSourcedCredentials),
    /// Fetched from a URL, see [UrlSourcedCredentials].
    Url(UrlSourcedCredentials),
    /// Printed by a local executable, see [ExecutableSourcedCredentials].
    Executable(ExecutableSourcedCredentials),
    /// A signed AWS request, see [AwsSourcedCredentials].
    Aws(AwsSourcedCredentials),
    /// Supplied by the application, see [ProgrammaticBuilder].
    Programmatic(ProgrammaticSourcedCredentials),
}

impl CredentialSource {
    /// A short name for the kind of credential source.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Url(_) => "url",
            Self::Executable(_) => "executable",
            Self::Aws(_) => "aws",
            Self::Programmatic(_) => "programmatic",
        }
    }

    async fn subject_token(&self) -> Result<SubjectToken> {
        let result = match self {
            Self::File(s) => s.subject_token().await,
            Self::Url(s) => s.subject_token().await,
            Self::Executable(s) => s.subject_token().await,
            Self::Aws(s) => s.subject_token().await,
            Self::Programmatic(s) => s.subject_token().await,
        };
        result.map_err(CredentialsError::into_subject_token)
    }
}

#[derive(Debug, Clone)]
struct Impersonation {
    url: String,
    service_account_email: String,
    lifetime: Duration,
    // Only set when the configuration provided it.
    token_lifetime_seconds: Option<u64>,
}

impl Impersonation {
    fn new(url: String, token_lifetime_seconds: Option<u64>) -> BuildResult<Self> {
        let service_account_email =
            impersonation::target_principal(&url).ok_or_else(BuilderError::invalid_impersonation_url)?;
        Ok(Self {
            url,
            service_account_email,
            lifetime: impersonation::lifetime(token_lifetime_seconds)?,
            token_lifetime_seconds,
        })
    }
}

#[derive(Clone)]
struct ExternalAccountConfig {
    audience: String,
    subject_token_type: String,
    token_url: String,
    token_info_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    scopes: Vec<String>,
    impersonation: Option<Impersonation>,
    credential_source: CredentialSource,
    // The `credential_source` object as configured, used by `to_json()`.
    credential_source_json: Option<Value>,
}

impl std::fmt::Debug for ExternalAccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalAccountConfig")
            .field("audience", &self.audience)
            .field("subject_token_type", &self.subject_token_type)
            .field("token_url", &self.token_url)
            .field("token_info_url", &self.token_info_url)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[censored]"),
            )
            .field("scopes", &self.scopes)
            .field("impersonation", &self.impersonation)
            .field("credential_source", &self.credential_source)
            .finish()
    }
}

fn validate_required(audience: &str, token_url: &str) -> BuildResult<()> {
    if audience.is_empty() {
        return Err(BuilderError::parsing("`audience` must not be empty"));
    }
    let url = url::Url::parse(token_url).map_err(BuilderError::parsing)?;
    if url.cannot_be_a_base() {
        return Err(BuilderError::parsing(format!(
            "`token_url` must be an absolute URL, got <{token_url}>"
        )));
    }
    Ok(())
}

fn scopes_or_default(scopes: Option<Vec<String>>) -> Vec<String> {
    match scopes {
        Some(s) if !s.is_empty() => s,
        _ => vec![DEFAULT_SCOPE.to_string()],
    }
}

fn make_transport(
    transport: Option<Arc<dyn HttpTransport>>,
    timeout: Option<Duration>,
) -> Arc<dyn HttpTransport> {
    match (transport, timeout) {
        (Some(t), _) => t,
        (None, Some(timeout)) => Arc::new(ReqwestTransport::new().with_timeout(timeout)),
        (None, None) => default_transport(),
    }
}

/// Records what the STS reported about the federated token.
fn token_metadata(
    issued_token_type: Option<String>,
    scope: Option<String>,
) -> Option<HashMap<String, String>> {
    let metadata: HashMap<String, String> = [
        (ISSUED_TOKEN_TYPE_KEY, issued_token_type),
        (SCOPE_KEY, scope),
    ]
    .into_iter()
    .filter_map(|(k, v)| v.map(|v| (k.to_string(), v)))
    .collect();
    (!metadata.is_empty()).then_some(metadata)
}

#[derive(Debug)]
struct ExternalAccountTokenProvider {
    config: Arc<ExternalAccountConfig>,
    transport: Arc<dyn HttpTransport>,
}

#[async_trait::async_trait]
impl TokenProvider for ExternalAccountTokenProvider {
    async fn token(&self) -> Result<Token> {
        let config = &self.config;
        tracing::debug!(
            source = config.credential_source.describe(),
            "refreshing external account token"
        );
        let subject_token = config.credential_source.subject_token().await?;

        // When impersonating, the federated token only needs to be able to
        // call the IAM Credentials API. The configured scopes apply to the
        // impersonated token.
        let (scope, extra_options) = match &config.impersonation {
            Some(i) => (
                vec![DEFAULT_SCOPE.to_string()],
                Some(json!({"serviceAccount": i.service_account_email})),
            ),
            None => (config.scopes.clone(), None),
        };
        let req = ExchangeTokenRequest {
            url: config.token_url.clone(),
            authentication: ClientAuthentication {
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
            },
            subject_token: subject_token.token,
            subject_token_type: config.subject_token_type.clone(),
            audience: Some(config.audience.clone()),
            scope,
            extra_options,
        };
        let token_res = STSHandler::exchange_token(self.transport.as_ref(), req).await?;

        let token = Token {
            token: token_res.access_token,
            token_type: token_res.token_type,
            expires_at: token_res
                .expires_in
                .map(|secs| Instant::now() + Duration::from_secs(secs)),
            metadata: token_metadata(token_res.issued_token_type, token_res.scope),
        };

        let Some(impersonation) = &config.impersonation else {
            return Ok(token);
        };
        impersonation::generate_access_token(
            self.transport.as_ref(),
            &token,
            &impersonation.url,
            &config.scopes,
            impersonation.lifetime,
        )
        .await
    }
}

/// Credentials for workloads authenticated by an external identity provider.
///
/// Instances are cheap to clone. Clones share the cached access token.
#[derive(Clone, Debug)]
pub struct ExternalAccountCredentials {
    config: Arc<ExternalAccountConfig>,
    quota_project_id: Option<String>,
    token_provider: TokenCache<ExternalAccountTokenProvider>,
}

impl ExternalAccountCredentials {
    fn new(
        config: ExternalAccountConfig,
        quota_project_id: Option<String>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let config = Arc::new(config);
        let token_provider = TokenCache::new(ExternalAccountTokenProvider {
            config: config.clone(),
            transport,
        });
        Self {
            config,
            quota_project_id,
            token_provider,
        }
    }

    /// Obtains a new access token, replacing the cached one.
    ///
    /// The subject token is retrieved again, and exchanged (and optionally
    /// impersonated) regardless of the state of the cache. If the refresh
    /// fails the previously cached token is kept.
    pub async fn refresh_access_token(&self) -> Result<Token> {
        self.token_provider.refresh().await
    }

    /// Returns the headers to authenticate a request to `uri`.
    ///
    /// The cached token is used while it is valid. If there is no token, or
    /// it has expired, the token is refreshed first. Refresh errors are
    /// returned, an expired token is never used.
    pub async fn request_metadata(&self, uri: &http::Uri) -> Result<HeaderMap> {
        tracing::debug!(%uri, "computing request metadata");
        self.headers().await
    }

    /// Returns the headers to authenticate a request.
    ///
    /// Same as [request_metadata][Self::request_metadata], for callers that
    /// do not have a target URI.
    pub async fn headers(&self) -> Result<HeaderMap> {
        let token = self.token_provider.token().await?;
        build_headers(&token, self.quota_project_id.as_deref())
    }

    /// The workload identity pool provider.
    pub fn audience(&self) -> &str {
        &self.config.audience
    }

    /// The type of the subject token, e.g.
    /// `urn:ietf:params:oauth:token-type:jwt`.
    pub fn subject_token_type(&self) -> &str {
        &self.config.subject_token_type
    }

    /// The Security Token Service endpoint.
    pub fn token_url(&self) -> &str {
        &self.config.token_url
    }

    /// The STS token introspection endpoint, if configured.
    pub fn token_info_url(&self) -> Option<&str> {
        self.config.token_info_url.as_deref()
    }

    /// Where the subject token comes from.
    pub fn credential_source(&self) -> &CredentialSource {
        &self.config.credential_source
    }

    /// The IAM Credentials `generateAccessToken` URL, if impersonating.
    pub fn service_account_impersonation_url(&self) -> Option<&str> {
        self.config.impersonation.as_ref().map(|i| i.url.as_str())
    }

    /// The service account named in the impersonation URL, if any.
    pub fn service_account_email(&self) -> Option<&str> {
        self.config
            .impersonation
            .as_ref()
            .map(|i| i.service_account_email.as_str())
    }

    /// The project billed for quota, sent as `x-goog-user-project`.
    pub fn quota_project_id(&self) -> Option<&str> {
        self.quota_project_id.as_deref()
    }

    /// The scopes requested for the access token.
    pub fn scopes(&self) -> &[String] {
        &self.config.scopes
    }

    /// Renders the configuration as an external account document.
    ///
    /// Passing the result to [Builder::new] creates equivalent credentials.
    /// Credentials created with [ProgrammaticBuilder] have no
    /// `credential_source` to render, and the result cannot be parsed again.
    pub fn to_json(&self) -> Value {
        let config = &self.config;
        let mut value = json!({
            "type": "external_account",
            "audience": config.audience,
            "subject_token_type": config.subject_token_type,
            "token_url": config.token_url,
            "scopes": config.scopes,
        });
        let optional = [
            ("token_info_url", config.token_info_url.clone().map(Value::from)),
            ("credential_source", config.credential_source_json.clone()),
            (
                "service_account_impersonation_url",
                config.impersonation.as_ref().map(|i| Value::from(i.url.clone())),
            ),
            (
                "service_account_impersonation",
                config
                    .impersonation
                    .as_ref()
                    .and_then(|i| i.token_lifetime_seconds)
                    .map(|s| json!({"token_lifetime_seconds": s})),
            ),
            ("quota_project_id", self.quota_project_id.clone().map(Value::from)),
            ("client_id", config.client_id.clone().map(Value::from)),
            ("client_secret", config.client_secret.clone().map(Value::from)),
        ];
        for (key, v) in optional.into_iter().filter_map(|(k, v)| Some((k, v?))) {
            value[key] = v;
        }
        value
    }
}

/// A builder for [ExternalAccountCredentials] instances.
///
/// # Example
/// ```
/// # use google_cloud_external_account::credentials::external_account::Builder;
/// # tokio_test::block_on(async {
/// let project_id = project_id();
/// let workload_identity_pool_id = workload_identity_pool();
/// let provider_id = workload_identity_provider();
/// let provider_name = format!(
///     "//iam.googleapis.com/projects/{project_id}/locations/global/workloadIdentityPools/{workload_identity_pool_id}/providers/{provider_id}"
/// );
/// let config = serde_json::json!({
///     "type": "external_account",
///     "audience": provider_name,
///     "subject_token_type": "urn:ietf:params:oauth:token-type:jwt",
///     "token_url": "https://sts.googleapis.com/v1/token",
///     "credential_source": {
///         "url": format!("http://169.254.169.254/metadata/identity/oauth2/token?api-version=2018-02-01&resource={provider_name}"),
///         "headers": {
///           "Metadata": "True"
///         },
///         "format": {
///           "type": "json",
///           "subject_token_field_name": "access_token"
///         }
///     }
/// });
/// let credentials = Builder::new(config)
///     .with_quota_project_id("quota_project")
///     .build()?;
/// assert_eq!(credentials.credential_source().describe(), "url");
/// # Ok::<(), anyhow::Error>(())
/// # });
///
/// # fn project_id() -> String {
/// #     "test-only".to_string()
/// # }
/// # fn workload_identity_pool() -> String {
/// #     "test-only".to_string()
/// # }
/// # fn workload_identity_provider() -> String {
/// #     "test-only".to_string()
/// # }
/// ```
pub struct Builder {
    external_account_config: Value,
    quota_project_id: Option<String>,
    scopes: Option<Vec<String>>,
    transport: Option<Arc<dyn HttpTransport>>,
    timeout: Option<Duration>,
}

impl Builder {
    /// Creates a new builder using [external_account_credentials] JSON value.
    ///
    /// [external_account_credentials]: https://google.aip.dev/auth/4117#configuration-file-generation-and-usage
    pub fn new(external_account_config: Value) -> Self {
        Self {
            external_account_config,
            quota_project_id: None,
            scopes: None,
            transport: None,
            timeout: None,
        }
    }

    /// Creates a new builder from a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, or if its contents are
    /// not JSON.
    pub fn from_file<P: AsRef<Path>>(path: P) -> BuildResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(BuilderError::loading)?;
        let config = serde_json::from_str::<Value>(&contents).map_err(BuilderError::parsing)?;
        tracing::debug!(path = %path.display(), "loaded external account configuration");
        Ok(Self::new(config))
    }

    /// Sets the [quota project] for this credentials.
    ///
    /// Overrides any `quota_project_id` in the configuration. In some
    /// services, you can use a service account in one project for
    /// authentication and authorization, and charge the usage to a different
    /// project. This requires that the service account has
    /// `serviceusage.services.use` permissions on the quota project.
    ///
    /// [quota project]: https://cloud.google.com/docs/quotas/quota-project
    pub fn with_quota_project_id<S: Into<String>>(mut self, quota_project_id: S) -> Self {
        self.quota_project_id = Some(quota_project_id.into());
        self
    }

    /// Overrides the [scopes] for this credentials.
    ///
    /// [scopes]: https://developers.google.com/identity/protocols/oauth2/scopes
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = Some(scopes.into_iter().map(|s| s.into()).collect());
        self
    }

    /// Sets the transport used for all HTTP requests.
    ///
    /// When set, [with_timeout][Self::with_timeout] has no effect, the
    /// transport applies its own timeouts.
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the timeout for each HTTP request made by the default transport.
    ///
    /// Defaults to 30 seconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns an [ExternalAccountCredentials] instance with the configured
    /// settings.
    ///
    /// # Errors
    ///
    /// Returns a [BuilderError] if the configuration is `null`, or if it
    /// cannot be interpreted as an external account configuration. This
    /// typically happens if the JSON value is malformed, is missing required
    /// fields, or the `credential_source` matches no supported shape. For
    /// more information on the expected format, consult the relevant section
    /// in the [external_account_credentials] guide.
    ///
    /// [external_account_credentials]: https://google.aip.dev/auth/4117#configuration-file-generation-and-usage
    pub fn build(self) -> BuildResult<ExternalAccountCredentials> {
        if self.external_account_config.is_null() {
            return Err(BuilderError::precondition(
                "the external account configuration must not be null",
            ));
        }
        let file: ExternalAccountFile =
            serde_json::from_value(self.external_account_config).map_err(BuilderError::parsing)?;
        validate_required(&file.audience, &file.token_url)?;

        let impersonation = file
            .service_account_impersonation_url
            .map(|url| {
                Impersonation::new(
                    url,
                    file.service_account_impersonation
                        .and_then(|i| i.token_lifetime_seconds),
                )
            })
            .transpose()?;

        let transport = make_transport(self.transport, self.timeout);
        let ctx = SourceContext {
            audience: &file.audience,
            subject_token_type: &file.subject_token_type,
            service_account_email: impersonation
                .as_ref()
                .map(|i| i.service_account_email.as_str()),
            transport: &transport,
        };
        let credential_source = parse_credential_source(file.credential_source.clone(), &ctx)?;

        let config = ExternalAccountConfig {
            audience: file.audience,
            subject_token_type: file.subject_token_type,
            token_url: file.token_url,
            token_info_url: file.token_info_url,
            client_id: file.client_id,
            client_secret: file.client_secret,
            scopes: scopes_or_default(self.scopes.or(file.scopes)),
            impersonation,
            credential_source,
            credential_source_json: Some(file.credential_source),
        };
        let quota_project_id = self.quota_project_id.or(file.quota_project_id);
        Ok(ExternalAccountCredentials::new(
            config,
            quota_project_id,
            transport,
        ))
    }
}

/// A builder for [ExternalAccountCredentials] that uses a user provided
/// subject token provider.
///
/// This builder is designed for advanced use cases where the subject token is
/// provided directly by the application through a custom implementation of the
/// [SubjectTokenProvider] trait.
///
/// # Example
///
/// ```
/// # use google_cloud_external_account::credentials::external_account::ProgrammaticBuilder;
/// # use google_cloud_external_account::credentials::subject_token::{SubjectTokenProvider, SubjectToken, Builder as SubjectTokenBuilder};
/// # use google_cloud_external_account::errors::SubjectTokenProviderError;
/// # use std::error::Error;
/// # use std::fmt;
/// # use std::sync::Arc;
/// #
/// # #[derive(Debug)]
/// # struct MyTokenProvider;
/// #
/// # #[derive(Debug)]
/// # struct MyProviderError;
/// # impl fmt::Display for MyProviderError { fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "MyProviderError") } }
/// # impl Error for MyProviderError {}
/// # impl SubjectTokenProviderError for MyProviderError { fn is_transient(&self) -> bool { false } }
/// #
/// # impl SubjectTokenProvider for MyTokenProvider {
/// #     type Error = MyProviderError;
/// #     async fn subject_token(&self) -> Result<SubjectToken, Self::Error> {
/// #         Ok(SubjectTokenBuilder::new("my-programmatic-token").build())
/// #     }
/// # }
/// #
/// let provider = Arc::new(MyTokenProvider);
///
/// let credentials = ProgrammaticBuilder::new(provider)
///     .with_audience("//iam.googleapis.com/projects/123/locations/global/workloadIdentityPools/my-pool/providers/my-provider")
///     .with_subject_token_type("urn:ietf:params:oauth:token-type:jwt")
///     .with_token_url("https://sts.googleapis.com/v1/token")
///     .with_quota_project_id("my-quota-project")
///     .with_scopes(["https://www.googleapis.com/auth/devstorage.read_only"])
///     .build()?;
/// assert_eq!(credentials.credential_source().describe(), "programmatic");
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct ProgrammaticBuilder {
    source: ProgrammaticSourcedCredentials,
    audience: Option<String>,
    subject_token_type: Option<String>,
    token_url: Option<String>,
    token_info_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    service_account_impersonation_url: Option<String>,
    token_lifetime_seconds: Option<u64>,
    quota_project_id: Option<String>,
    scopes: Option<Vec<String>>,
    transport: Option<Arc<dyn HttpTransport>>,
    timeout: Option<Duration>,
}

impl ProgrammaticBuilder {
    /// Creates a new builder that uses the provided [SubjectTokenProvider] to
    /// fetch the third-party subject token.
    pub fn new<T>(subject_token_provider: Arc<T>) -> Self
    where
        T: SubjectTokenProvider + 'static,
    {
        Self {
            source: ProgrammaticSourcedCredentials::new(subject_token_provider),
            audience: None,
            subject_token_type: None,
            token_url: None,
            token_info_url: None,
            client_id: None,
            client_secret: None,
            service_account_impersonation_url: None,
            token_lifetime_seconds: None,
            quota_project_id: None,
            scopes: None,
            transport: None,
            timeout: None,
        }
    }

    /// Sets the required audience for the token exchange.
    ///
    /// This is the resource name for the workload identity pool and the provider
    /// identifier in that pool.
    pub fn with_audience<S: Into<String>>(mut self, audience: S) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Sets the required subject token type.
    ///
    /// This is the subject token type defined by RFC 8693, e.g.
    /// `urn:ietf:params:oauth:token-type:jwt`.
    pub fn with_subject_token_type<S: Into<String>>(mut self, subject_token_type: S) -> Self {
        self.subject_token_type = Some(subject_token_type.into());
        self
    }

    /// Sets the required token URL for the STS token exchange.
    pub fn with_token_url<S: Into<String>>(mut self, token_url: S) -> Self {
        self.token_url = Some(token_url.into());
        self
    }

    /// Sets the optional token introspection URL.
    pub fn with_token_info_url<S: Into<String>>(mut self, token_info_url: S) -> Self {
        self.token_info_url = Some(token_info_url.into());
        self
    }

    /// Sets the optional client ID for client authentication.
    pub fn with_client_id<S: Into<String>>(mut self, client_id: S) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the optional client secret for client authentication.
    pub fn with_client_secret<S: Into<String>>(mut self, client_secret: S) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Impersonates the service account named in `url` after the token
    /// exchange.
    pub fn with_service_account_impersonation_url<S: Into<String>>(mut self, url: S) -> Self {
        self.service_account_impersonation_url = Some(url.into());
        self
    }

    /// Sets the lifetime of impersonated tokens, between 600 and 43200
    /// seconds. Defaults to 3600.
    pub fn with_token_lifetime_seconds(mut self, seconds: u64) -> Self {
        self.token_lifetime_seconds = Some(seconds);
        self
    }

    /// Sets the optional [quota project] for this credentials.
    ///
    /// [quota project]: https://cloud.google.com/docs/quotas/quota-project
    pub fn with_quota_project_id<S: Into<String>>(mut self, quota_project_id: S) -> Self {
        self.quota_project_id = Some(quota_project_id.into());
        self
    }

    /// Sets the [scopes] for these credentials.
    /// By default `https://www.googleapis.com/auth/cloud-platform` scope is used.
    ///
    /// [scopes]: https://developers.google.com/identity/protocols/oauth2/scopes
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = Some(scopes.into_iter().map(|s| s.into()).collect());
        self
    }

    /// Sets the transport used for all HTTP requests.
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the timeout for each HTTP request made by the default transport.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns an [ExternalAccountCredentials] instance with the configured
    /// settings.
    ///
    /// # Errors
    ///
    /// Returns a [BuilderError] if any of the required fields (such as
    /// `audience`, `subject_token_type`, or `token_url`) have not been set.
    pub fn build(self) -> BuildResult<ExternalAccountCredentials> {
        let audience = self.audience.ok_or(BuilderError::missing_field("audience"))?;
        let subject_token_type = self
            .subject_token_type
            .ok_or(BuilderError::missing_field("subject_token_type"))?;
        let token_url = self
            .token_url
            .ok_or(BuilderError::missing_field("token_url"))?;
        validate_required(&audience, &token_url)?;
        let impersonation = self
            .service_account_impersonation_url
            .map(|url| Impersonation::new(url, self.token_lifetime_seconds))
            .transpose()?;

        let config = ExternalAccountConfig {
            audience,
            subject_token_type,
            token_url,
            token_info_url: self.token_info_url,
            client_id: self.client_id,
            client_secret: self.client_secret,
            scopes: scopes_or_default(self.scopes),
            impersonation,
            credential_source: CredentialSource::Programmatic(self.source),
            credential_source_json: None,
        };
        Ok(ExternalAccountCredentials::new(
            config,
            self.quota_project_id,
            make_transport(self.transport, self.timeout),
        ))
    }
}
