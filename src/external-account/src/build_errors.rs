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

//! Errors created during credentials construction.

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type for external account credentials builders.
///
/// All configuration problems are reported when the credentials are built,
/// never deferred until the first token refresh.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    /// A problem finding or opening the configuration file.
    pub fn is_loading(&self) -> bool {
        matches!(self.0, ErrorKind::Loading(_))
    }

    /// The configuration document cannot be interpreted as an external
    /// account configuration.
    ///
    /// Missing required fields, fields of the wrong type, and credential
    /// sources that match no known shape all produce this error.
    pub fn is_parsing(&self) -> bool {
        matches!(self.0, ErrorKind::Parsing(_))
    }

    /// The service account impersonation URL does not identify a target
    /// principal.
    pub fn is_invalid_impersonation_url(&self) -> bool {
        matches!(self.0, ErrorKind::InvalidImpersonationUrl)
    }

    /// The builder was used incorrectly, for example with a `null`
    /// configuration document.
    pub fn is_precondition(&self) -> bool {
        matches!(self.0, ErrorKind::Precondition(_))
    }

    /// A required field was missing from the builder.
    pub fn is_missing_field(&self) -> bool {
        matches!(self.0, ErrorKind::MissingField(_))
    }

    pub(crate) fn loading<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::Loading(source.into()))
    }

    pub(crate) fn parsing<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::Parsing(source.into()))
    }

    pub(crate) fn invalid_impersonation_url() -> Error {
        Error(ErrorKind::InvalidImpersonationUrl)
    }

    pub(crate) fn precondition(message: &'static str) -> Error {
        Error(ErrorKind::Precondition(message))
    }

    pub(crate) fn missing_field(field: &'static str) -> Error {
        Error(ErrorKind::MissingField(field))
    }
}

#[derive(thiserror::Error, Debug)]
enum ErrorKind {
    #[error("could not find or open the credentials file {0}")]
    Loading(#[source] BoxError),
    #[error("An invalid input stream was provided.")]
    Parsing(#[source] BoxError),
    #[error("Unable to determine target principal from service account impersonation URL.")]
    InvalidImpersonationUrl,
    #[error("precondition violated: {0}")]
    Precondition(&'static str),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}
