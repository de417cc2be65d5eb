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
use crate::errors::CredentialsError;

/// Reads the subject token from a file on the local filesystem.
///
/// The file is read again on every refresh, the identity provider (or a
/// sidecar) is expected to rotate its contents.
#[derive(Debug, Clone, PartialEq)]
pub struct FileSourcedCredentials {
    file: String,
    format: CredentialSourceFormat,
}

impl FileSourcedCredentials {
    pub(crate) fn new(file: String, format: Option<CredentialSourceFormat>) -> Self {
        Self {
            file,
            format: format.unwrap_or_default(),
        }
    }

    /// The path of the file containing the subject token.
    pub fn file(&self) -> &str {
        &self.file
    }

    pub(crate) async fn subject_token(&self) -> Result<SubjectToken> {
        tracing::debug!(file = %self.file, "reading subject token from file");
        let content = tokio::fs::read_to_string(&self.file)
            .await
            .map_err(|e| CredentialsError::from_source(false, e))?;
        self.format.subject_token(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::{error::Error, io::Write};
    use tempfile::NamedTempFile;

    type TestResult = anyhow::Result<()>;

    fn create_temp_file(content: &str) -> std::io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        file.write_all(content.as_bytes())?;
        Ok(file)
    }

    fn json_format(field: &str) -> Option<CredentialSourceFormat> {
        Some(CredentialSourceFormat {
            format_type: "json".into(),
            subject_token_field_name: Some(field.into()),
        })
    }

    #[tokio::test]
    async fn get_text_token() -> TestResult {
        let file = create_temp_file("an_example_token\n")?;
        let token_provider =
            FileSourcedCredentials::new(file.path().to_string_lossy().to_string(), None);
        let resp = token_provider.subject_token().await?;
        assert_eq!(resp.token, "an_example_token");
        Ok(())
    }

    #[tokio::test]
    async fn get_json_token() -> TestResult {
        let response_body = json!({
            "access_token":"an_example_token",
        })
        .to_string();
        let file = create_temp_file(&response_body)?;
        let token_provider = FileSourcedCredentials::new(
            file.path().to_string_lossy().to_string(),
            json_format("access_token"),
        );
        let resp = token_provider.subject_token().await?;
        assert_eq!(resp.token, "an_example_token");
        Ok(())
    }

    #[tokio::test]
    async fn get_json_token_missing_field() -> TestResult {
        let response_body = json!({
            "wrong_field":"an_example_token",
        })
        .to_string();
        let file = create_temp_file(&response_body)?;
        let token_provider = FileSourcedCredentials::new(
            file.path().to_string_lossy().to_string(),
            json_format("access_token"),
        );
        let err = token_provider
            .subject_token()
            .await
            .expect_err("parsing should fail");
        assert!(!err.is_transient(), "{err:?}");
        assert!(err.source().is_none());
        assert!(err.to_string().contains("`access_token`"), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn file_not_found() -> TestResult {
        let token_provider =
            FileSourcedCredentials::new("/path/to/non/existent/file".to_string(), None);
        let err = token_provider
            .subject_token()
            .await
            .expect_err("file should not exist");
        assert!(!err.is_transient(), "{err:?}");
        let source = err.source().and_then(|e| e.downcast_ref::<std::io::Error>());
        assert!(source.is_some(), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn empty_file() -> TestResult {
        let file = create_temp_file("  \n")?;
        let token_provider =
            FileSourcedCredentials::new(file.path().to_string_lossy().to_string(), None);
        let err = token_provider
            .subject_token()
            .await
            .expect_err("empty tokens are rejected");
        assert!(err.to_string().contains("empty"), "{err}");
        Ok(())
    }

    #[tokio::test]
    async fn get_json_token_from_empty_file() -> TestResult {
        let file = create_temp_file("")?;
        let token_provider = FileSourcedCredentials::new(
            file.path().to_string_lossy().to_string(),
            json_format("access_token"),
        );
        let err = token_provider
            .subject_token()
            .await
            .expect_err("parsing should fail");
        assert!(!err.is_transient(), "{err:?}");
        assert!(err.source().is_some());
        Ok(())
    }
}
