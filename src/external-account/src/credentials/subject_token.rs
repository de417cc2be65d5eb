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

//! Subject tokens supplied by the application.
//!
//! Most configurations obtain the subject token from a file, a URL, an
//! executable, or the AWS environment. Applications with other sources of
//! identity implement [SubjectTokenProvider] and use
//! [ProgrammaticBuilder][crate::credentials::external_account::ProgrammaticBuilder].

use crate::errors::SubjectTokenProviderError;

/// Creates a [SubjectToken].
pub struct Builder {
    token: String,
}

impl Builder {
    /// Starts a builder with the raw token value.
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Returns a [SubjectToken] holding the token value.
    pub fn build(self) -> SubjectToken {
        SubjectToken { token: self.token }
    }
}

/// A token issued by the external identity provider.
///
/// The value is exchanged for a Google access token and never logged.
#[derive(Clone, PartialEq)]
pub struct SubjectToken {
    pub(crate) token: String,
}

impl std::fmt::Debug for SubjectToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectToken")
            .field("token", &"[censored]")
            .finish()
    }
}

/// Produces subject tokens for external account credentials.
pub trait SubjectTokenProvider: std::fmt::Debug + Send + Sync {
    /// The error type returned by this provider.
    type Error: SubjectTokenProviderError;

    /// Returns a fresh subject token.
    fn subject_token(&self) -> impl Future<Output = Result<SubjectToken, Self::Error>> + Send;
}

pub(crate) mod dynamic {
    use super::SubjectToken;
    use crate::errors::{CredentialsError, SubjectTokenProviderError};

    /// A dyn-compatible, crate-private version of `SubjectTokenProvider`.
    #[async_trait::async_trait]
    pub trait SubjectTokenProvider: Send + Sync + std::fmt::Debug {
        async fn subject_token(&self) -> crate::Result<SubjectToken>;
    }

    /// The public `SubjectTokenProvider` implements the dyn-compatible `SubjectTokenProvider`.
    #[async_trait::async_trait]
    impl<T> SubjectTokenProvider for T
    where
        T: super::SubjectTokenProvider,
    {
        async fn subject_token(&self) -> crate::Result<SubjectToken> {
            T::subject_token(self).await.map_err(|e| {
                let is_transient = e.is_transient();
                CredentialsError::from_source(is_transient, e)
            })
        }
    }
}
