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
use crate::constants::{ID_TOKEN_TYPE, JWT_TOKEN_TYPE, SAML2_TOKEN_TYPE};
use crate::credentials::subject_token::{Builder as SubjectTokenBuilder, SubjectToken};
use crate::errors::CredentialsError;
use crate::{BuildResult, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::{process::Command, time::timeout as tokio_timeout};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub(crate) struct ExecutableConfig {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_millis: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
}

impl ExecutableConfig {
    pub(crate) fn validate(&self) -> BuildResult<()> {
        if self.command.trim().is_empty() {
            return Err(BuilderError::parsing(
                "the executable credential source requires a `command`",
            ));
        }
        if let Some(t) = self.timeout_millis {
            if !(MIN_TIMEOUT_MILLIS..=MAX_TIMEOUT_MILLIS).contains(&t) {
                return Err(BuilderError::parsing(format!(
                    "executable `timeout_millis` must be between {MIN_TIMEOUT_MILLIS} and {MAX_TIMEOUT_MILLIS}, got {t}"
                )));
            }
        }
        Ok(())
    }
}

/// The executable response format, documented in [AIP-4117].
///
/// [AIP-4117]: https://google.aip.dev/auth/4117#determining-the-subject-token-in-executable-sourced-credentials
#[derive(Deserialize, Debug, Clone, PartialEq)]
struct ExecutableResponse {
    version: Option<i64>,
    success: Option<bool>,
    token_type: Option<String>,
    expiration_time: Option<i64>,
    id_token: Option<String>,
    saml_response: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

const MSG: &str = "failed to read subject token";
// The default and bounds are defined by AIP-4117.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MIN_TIMEOUT_MILLIS: u32 = 5_000;
const MAX_TIMEOUT_MILLIS: u32 = 120_000;
const SUPPORTED_VERSION: i64 = 1;

pub(crate) const ALLOW_EXECUTABLE_ENV: &str = "GOOGLE_EXTERNAL_ACCOUNT_ALLOW_EXECUTABLES";

/// Runs a local executable to obtain the subject token.
///
/// Running executables must be explicitly allowed by setting
/// `GOOGLE_EXTERNAL_ACCOUNT_ALLOW_EXECUTABLES=1` in the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutableSourcedCredentials {
    executable: ExecutableConfig,
    audience: String,
    subject_token_type: String,
    service_account_email: Option<String>,
}

impl ExecutableSourcedCredentials {
    pub(crate) fn new(
        executable: ExecutableConfig,
        audience: String,
        subject_token_type: String,
        service_account_email: Option<String>,
    ) -> Self {
        Self {
            executable,
            audience,
            subject_token_type,
            service_account_email,
        }
    }

    /// The command line, including any arguments.
    pub fn command(&self) -> &str {
        &self.executable.command
    }

    /// The maximum time the command may run.
    pub fn timeout(&self) -> Duration {
        self.executable
            .timeout_millis
            .map(|t| Duration::from_millis(t.into()))
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    /// The file where the executable caches its response, if any.
    pub fn output_file(&self) -> Option<&str> {
        self.executable.output_file.as_deref()
    }

    pub(crate) async fn subject_token(&self) -> Result<SubjectToken> {
        // See the security considerations in AIP-4117.
        let allow_executable = std::env::var(ALLOW_EXECUTABLE_ENV).unwrap_or_default();
        if allow_executable != "1" {
            return Err(CredentialsError::from_msg(
                false,
                "executables need to be explicitly allowed (set GOOGLE_EXTERNAL_ACCOUNT_ALLOW_EXECUTABLES to '1') to run",
            ));
        }

        if let Some(output_file) = &self.executable.output_file {
            match Self::from_output_file(output_file).await {
                Ok(token) => return Ok(token),
                Err(e) => tracing::debug!("ignoring cached executable response: {e}"),
            }
        }

        self.from_command().await
    }

    async fn from_output_file(output_file: &str) -> Result<SubjectToken> {
        let content = tokio::fs::read_to_string(output_file)
            .await
            .map_err(|e| CredentialsError::from_source(false, e))?;
        Self::parse_token(&content, true)
    }

    async fn from_command(&self) -> Result<SubjectToken> {
        let (program, args) = split_command(&self.executable.command);
        tracing::debug!(program, "running executable to obtain subject token");

        let mut command = Command::new(program);
        command
            .args(args)
            .env("GOOGLE_EXTERNAL_ACCOUNT_AUDIENCE", &self.audience)
            .env("GOOGLE_EXTERNAL_ACCOUNT_TOKEN_TYPE", &self.subject_token_type)
            .env("GOOGLE_EXTERNAL_ACCOUNT_INTERACTIVE", "0")
            .kill_on_drop(true);
        if let Some(email) = &self.service_account_email {
            command.env("GOOGLE_EXTERNAL_ACCOUNT_IMPERSONATED_EMAIL", email);
        }
        if let Some(output_file) = &self.executable.output_file {
            command.env("GOOGLE_EXTERNAL_ACCOUNT_OUTPUT_FILE", output_file);
        }

        let output = tokio_timeout(self.timeout(), command.output())
            .await
            .map_err(|e| CredentialsError::from_source(true, e))?
            .map_err(|e| CredentialsError::from_source(false, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let msg = match output.status.code() {
                Some(code) => {
                    format!("{MSG}, command execution failed, code={code}, stderr=<{stderr}>")
                }
                None => format!("{MSG}, command execution failed, stderr=<{stderr}>"),
            };
            return Err(CredentialsError::from_msg(false, msg));
        }

        let stdout =
            String::from_utf8(output.stdout).map_err(|e| CredentialsError::from_source(false, e))?;
        Self::parse_token(&stdout, false)
    }

    fn parse_token(output: &str, from_output_file: bool) -> Result<SubjectToken> {
        let res = serde_json::from_str::<ExecutableResponse>(output)
            .map_err(|e| CredentialsError::from_source(false, e))?;

        match res.version {
            Some(SUPPORTED_VERSION) => {}
            Some(v) => {
                return Err(CredentialsError::from_msg(
                    false,
                    format!("{MSG}, unsupported executable response version {v}"),
                ));
            }
            None => {
                return Err(CredentialsError::from_msg(
                    false,
                    format!("{MSG}, the executable response is missing the `version` field"),
                ));
            }
        }

        let Some(success) = res.success else {
            return Err(CredentialsError::from_msg(
                false,
                format!("{MSG}, the executable response is missing the `success` field"),
            ));
        };
        if !success {
            return Err(match (&res.code, &res.message) {
                (Some(code), Some(message)) => CredentialsError::from_msg(
                    false,
                    format!(
                        "{MSG}, response contains unsuccessful response, code=<{code}>, message=<{message}>"
                    ),
                ),
                _ => CredentialsError::from_msg(
                    false,
                    format!(
                        "{MSG}, response must include `code` and `message` fields when unsuccessful"
                    ),
                ),
            });
        }

        match res.expiration_time {
            Some(expiration) if expiration <= time::OffsetDateTime::now_utc().unix_timestamp() => {
                return Err(CredentialsError::from_msg(
                    true,
                    "the token returned by the executable is expired",
                ));
            }
            Some(_) => {}
            None if from_output_file => {
                return Err(CredentialsError::from_msg(
                    false,
                    format!(
                        "{MSG}, the `expiration_time` field is required when an output file is configured"
                    ),
                ));
            }
            None => {}
        }

        let token = match res.token_type.as_deref() {
            Some(JWT_TOKEN_TYPE | ID_TOKEN_TYPE) => res.id_token.ok_or_else(|| {
                CredentialsError::from_msg(false, format!("{MSG}, missing `id_token` field"))
            })?,
            Some(SAML2_TOKEN_TYPE) => res.saml_response.ok_or_else(|| {
                CredentialsError::from_msg(false, format!("{MSG}, missing `saml_response` field"))
            })?,
            Some(other) => {
                return Err(CredentialsError::from_msg(
                    false,
                    format!("{MSG}, unsupported token type <{other}>"),
                ));
            }
            None => {
                return Err(CredentialsError::from_msg(
                    false,
                    format!("{MSG}, missing `token_type` field"),
                ));
            }
        };

        if token.trim().is_empty() {
            return Err(CredentialsError::from_msg(
                false,
                format!("{MSG}, subject token is empty"),
            ));
        }
        Ok(SubjectTokenBuilder::new(token).build())
    }
}

fn split_command(command: &str) -> (&str, Vec<&str>) {
    let mut parts = command.split_whitespace();
    let program = parts.next().unwrap_or(command);
    (program, parts.collect())
}
