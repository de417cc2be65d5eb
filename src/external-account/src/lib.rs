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

//! Google Cloud Client Libraries for Rust - External Account Credentials
//!
//! This crate issues short-lived Google Cloud access tokens for workloads
//! whose identity is established by an external identity provider, such as
//! an AWS IAM role, a Kubernetes service account, or an on-premises OIDC or
//! SAML provider. This is known as [Workload Identity Federation].
//!
//! The credentials obtain a *subject token* from the configured
//! [credential source], exchange it for a Google access token using the
//! [OAuth 2.0 Token Exchange] protocol, and optionally use that token to
//! [impersonate] a service account.
//!
//! ```
//! # use google_cloud_external_account::credentials::external_account::Builder;
//! # tokio_test::block_on(async {
//! let config = serde_json::json!({
//!     "type": "external_account",
//!     "audience": "//iam.googleapis.com/projects/123/locations/global/workloadIdentityPools/my-pool/providers/my-provider",
//!     "subject_token_type": "urn:ietf:params:oauth:token-type:jwt",
//!     "token_url": "https://sts.googleapis.com/v1/token",
//!     "credential_source": {
//!         "file": "/var/run/secrets/tokens/gcp-ksa/token"
//!     }
//! });
//! let credentials = Builder::new(config).build()?;
//! assert_eq!(credentials.credential_source().describe(), "file");
//! # Ok::<(), anyhow::Error>(())
//! # });
//! ```
//!
//! [Workload Identity Federation]: https://cloud.google.com/iam/docs/workload-identity-federation
//! [credential source]: https://google.aip.dev/auth/4117
//! [OAuth 2.0 Token Exchange]: https://datatracker.ietf.org/doc/html/rfc8693
//! [impersonate]: https://cloud.google.com/iam/docs/service-account-impersonation

pub mod build_errors;
pub mod errors;

/// Types and functions to work with external account [Credentials].
///
/// [Credentials]: https://cloud.google.com/docs/authentication#credentials
pub mod credentials;

/// Types and functions to work with auth [Tokens].
///
/// [Tokens]: https://cloud.google.com/docs/authentication#token
pub mod token;

/// The HTTP transport used to reach token endpoints and metadata servers.
pub mod transport;

pub(crate) mod constants;

/// The token cache
pub(crate) mod token_cache;

pub(crate) mod headers_util;

/// A `Result` alias where the `Err` case is
/// `google_cloud_external_account::errors::CredentialsError`.
pub type Result<T> = std::result::Result<T, crate::errors::CredentialsError>;

/// A `Result` alias where the `Err` case is
/// `google_cloud_external_account::build_errors::Error`.
pub type BuildResult<T> = std::result::Result<T, crate::build_errors::Error>;
