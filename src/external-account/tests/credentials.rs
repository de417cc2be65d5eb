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

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use google_cloud_external_account::credentials::external_account::{
        Builder, CredentialSource,
    };
    use google_cloud_external_account::errors::CredentialsError;
    use google_cloud_external_account::transport::{HttpTransport, ReqwestTransport};
    use httptest::{Expectation, Server, cycle, matchers::*, responders::*};
    use serde_json::{Value, json};
    use std::error::Error as _;
    use std::io::Write;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::NamedTempFile;

    type TestResult = anyhow::Result<()>;

    const JWT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:jwt";
    const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";
    const AUDIENCE: &str = "//iam.googleapis.com/projects/123/locations/global/workloadIdentityPools/pool/providers/provider";
    const IMPERSONATION_PATH: &str =
        "/v1/projects/-/serviceAccounts/sa@project.iam.gserviceaccount.com:generateAccessToken";

    fn subject_token_file(token: &str) -> anyhow::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        file.write_all(token.as_bytes())?;
        Ok(file)
    }

    fn file_config(server: &Server, file: &NamedTempFile) -> Value {
        json!({
            "type": "external_account",
            "audience": AUDIENCE,
            "subject_token_type": JWT_TOKEN_TYPE,
            "token_url": server.url("/v1/token").to_string(),
            "credential_source": {
                "file": file.path().to_string_lossy(),
            }
        })
    }

    fn sts_response(token: &str) -> Value {
        json!({
            "access_token": token,
            "issued_token_type": ACCESS_TOKEN_TYPE,
            "token_type": "Bearer",
            "expires_in": 3600,
        })
    }

    fn rfc3339_in_one_hour() -> anyhow::Result<String> {
        Ok((time::OffsetDateTime::now_utc() + time::Duration::hours(1))
            .format(&time::format_description::well_known::Rfc3339)?)
    }

    #[tokio::test]
    async fn file_sourced_without_impersonation() -> TestResult {
        let file = subject_token_file("subject-token-from-file\n")?;
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/v1/token"),
                request::body(url_decoded(contains((
                    "subject_token",
                    "subject-token-from-file"
                )))),
                request::body(url_decoded(contains(("subject_token_type", JWT_TOKEN_TYPE)))),
                request::body(url_decoded(contains(("audience", AUDIENCE)))),
                request::body(url_decoded(contains((
                    "scope",
                    "https://www.googleapis.com/auth/cloud-platform"
                )))),
            ])
            .respond_with(json_encoded(sts_response("federated-token"))),
        );

        let creds = Builder::new(file_config(&server, &file)).build()?;
        let token = creds.refresh_access_token().await?;
        assert_eq!(token.token, "federated-token");
        assert_eq!(token.token_type, "Bearer");

        let headers = creds.headers().await?;
        assert_eq!(
            headers.get(http::header::AUTHORIZATION),
            Some(&http::HeaderValue::from_static("Bearer federated-token"))
        );
        assert!(headers.get("x-goog-user-project").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn url_sourced_with_impersonation() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/subject"),
                request::headers(contains(("metadata", "True"))),
            ])
            .respond_with(json_encoded(json!({"id_token": "subject-token-from-url"}))),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/v1/token"),
                request::body(url_decoded(contains((
                    "subject_token",
                    "subject-token-from-url"
                )))),
                request::body(url_decoded(contains((
                    "scope",
                    "https://www.googleapis.com/auth/cloud-platform"
                )))),
                request::body(url_decoded(contains((
                    "options",
                    json!({"serviceAccount": "sa@project.iam.gserviceaccount.com"}).to_string()
                )))),
            ])
            .respond_with(json_encoded(sts_response("federated-token"))),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", IMPERSONATION_PATH),
                request::headers(contains(("authorization", "Bearer federated-token"))),
                request::body(json_decoded(eq(json!({
                    "scope": ["https://www.googleapis.com/auth/pubsub"],
                    "lifetime": "3600s",
                })))),
            ])
            .respond_with(json_encoded(json!({
                "accessToken": "impersonated-token",
                "expireTime": rfc3339_in_one_hour()?,
            }))),
        );

        let config = json!({
            "type": "external_account",
            "audience": AUDIENCE,
            "subject_token_type": JWT_TOKEN_TYPE,
            "token_url": server.url("/v1/token").to_string(),
            "service_account_impersonation_url": server.url(IMPERSONATION_PATH).to_string(),
            "credential_source": {
                "url": server.url("/subject").to_string(),
                "headers": {"Metadata": "True"},
                "format": {"type": "json", "subject_token_field_name": "id_token"},
            }
        });
        let creds = Builder::new(config)
            .with_scopes(["https://www.googleapis.com/auth/pubsub"])
            .build()?;
        assert_eq!(
            creds.service_account_email(),
            Some("sa@project.iam.gserviceaccount.com")
        );
        let token = creds.refresh_access_token().await?;
        assert_eq!(token.token, "impersonated-token");
        Ok(())
    }

    #[tokio::test]
    async fn oauth_error_fields_are_preserved() -> TestResult {
        let file = subject_token_file("subject-token")?;
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/v1/token")).respond_with(
                status_code(400).body(
                    json!({
                        "error": "invalidRequest",
                        "error_description": "errorDescription",
                        "error_uri": "errorUri",
                    })
                    .to_string(),
                ),
            ),
        );

        let creds = Builder::new(file_config(&server, &file)).build()?;
        let err = creds.refresh_access_token().await.unwrap_err();
        assert!(err.is_protocol(), "{err:?}");
        assert!(!err.is_transient(), "{err:?}");
        let oauth = err.oauth_error().expect("protocol errors carry details");
        assert_eq!(oauth.error_code(), "invalidRequest");
        assert_eq!(oauth.error_description(), Some("errorDescription"));
        assert_eq!(oauth.error_uri(), Some("errorUri"));
        assert_eq!(oauth.status(), Some(http::StatusCode::BAD_REQUEST));
        Ok(())
    }

    #[tokio::test]
    async fn missing_subject_token_file() -> TestResult {
        let server = Server::run();
        let config = json!({
            "type": "external_account",
            "audience": AUDIENCE,
            "subject_token_type": JWT_TOKEN_TYPE,
            "token_url": server.url("/v1/token").to_string(),
            "credential_source": {"file": "/path/to/non/existent/file"}
        });
        let creds = Builder::new(config).build()?;
        let err = creds.headers().await.unwrap_err();
        assert!(err.is_subject_token(), "{err:?}");
        assert!(!err.is_transient(), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_url_source() -> TestResult {
        // Bind and immediately release a port so nothing is listening there.
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);

        let server = Server::run();
        let config = json!({
            "type": "external_account",
            "audience": AUDIENCE,
            "subject_token_type": JWT_TOKEN_TYPE,
            "token_url": server.url("/v1/token").to_string(),
            "credential_source": {"url": format!("http://{addr}/subject")}
        });
        let creds = Builder::new(config).build()?;
        let err = creds.refresh_access_token().await.unwrap_err();
        assert!(err.is_subject_token(), "{err:?}");
        assert!(!err.is_transport(), "{err:?}");
        assert!(err.is_transient(), "{err:?}");
        let source = err
            .source()
            .and_then(|e| e.downcast_ref::<reqwest::Error>());
        assert!(source.is_some_and(|e| e.is_connect()), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_refresh() -> TestResult {
        let file = subject_token_file("subject-token")?;
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/v1/token"))
                .times(1)
                .respond_with(
                    delay_and_then(
                        std::time::Duration::from_millis(200),
                        json_encoded(sts_response("federated-token")),
                    ),
                ),
        );

        let creds = Builder::new(file_config(&server, &file)).build()?;
        let clone = creds.clone();
        let (a, b) = tokio::join!(creds.headers(), clone.headers());
        assert_eq!(a?, b?);

        // The token is cached, no new exchange.
        let uri = http::Uri::from_static("https://pubsub.googleapis.com/v1/topics");
        let headers = creds.request_metadata(&uri).await?;
        assert_eq!(
            headers.get(http::header::AUTHORIZATION),
            Some(&http::HeaderValue::from_static("Bearer federated-token"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn quota_project_header() -> TestResult {
        let file = subject_token_file("subject-token")?;
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/v1/token"))
                .respond_with(json_encoded(sts_response("federated-token"))),
        );

        let creds = Builder::new(file_config(&server, &file))
            .with_quota_project_id("quota-project")
            .build()?;
        let headers = creds.headers().await?;
        assert_eq!(
            headers.get("x-goog-user-project"),
            Some(&http::HeaderValue::from_static("quota-project"))
        );
        let auth = headers
            .get(http::header::AUTHORIZATION)
            .expect("authorization is always present");
        assert!(auth.is_sensitive());
        Ok(())
    }

    #[tokio::test]
    async fn refresh_failure_keeps_cached_token() -> TestResult {
        let file = subject_token_file("subject-token")?;
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/v1/token"))
                .times(2)
                .respond_with(cycle![
                    json_encoded(sts_response("federated-token")),
                    status_code(503),
                ]),
        );

        let creds = Builder::new(file_config(&server, &file)).build()?;
        let token = creds.refresh_access_token().await?;
        assert_eq!(token.token, "federated-token");

        let err = creds.refresh_access_token().await.unwrap_err();
        assert!(err.is_protocol(), "{err:?}");
        assert!(err.is_transient(), "{err:?}");

        // The first token is still valid and cached.
        let headers = creds.headers().await?;
        assert_eq!(
            headers.get(http::header::AUTHORIZATION),
            Some(&http::HeaderValue::from_static("Bearer federated-token"))
        );
        Ok(())
    }

    #[derive(Debug)]
    struct CountingTransport {
        inner: ReqwestTransport,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl HttpTransport for CountingTransport {
        async fn send(
            &self,
            request: http::Request<Bytes>,
        ) -> Result<http::Response<Bytes>, CredentialsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.send(request).await
        }
    }

    #[tokio::test]
    async fn custom_transport() -> TestResult {
        let file = subject_token_file("subject-token")?;
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/v1/token"))
                .respond_with(json_encoded(sts_response("federated-token"))),
        );

        let transport = Arc::new(CountingTransport {
            inner: ReqwestTransport::new(),
            calls: AtomicUsize::new(0),
        });
        let creds = Builder::new(file_config(&server, &file))
            .with_transport(transport.clone())
            .build()?;
        creds.headers().await?;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn parse_aws_config() -> TestResult {
        let config = json!({
            "type": "external_account",
            "audience": "audience",
            "subject_token_type": "subjectTokenType",
            "token_url": "https://www.sts.google.com",
            "token_info_url": "tokenInfoUrl",
            "credential_source": {
                "environment_id": "aws1",
                "region_url": "regionUrl",
                "url": "url",
                "regional_cred_verification_url": "regionalCredVerificationUrl"
            }
        });
        let creds = Builder::new(config).build()?;
        assert!(
            matches!(creds.credential_source(), CredentialSource::Aws(_)),
            "{creds:?}"
        );
        assert_eq!(creds.token_info_url(), Some("tokenInfoUrl"));
        Ok(())
    }

    #[test]
    fn missing_credential_source() {
        let config = json!({
            "type": "external_account",
            "audience": "audience",
            "subject_token_type": "subjectTokenType",
            "token_url": "https://www.sts.google.com",
        });
        let err = Builder::new(config).build().unwrap_err();
        assert!(err.is_parsing(), "{err:?}");
        assert_eq!(err.to_string(), "An invalid input stream was provided.");
    }

    #[test]
    fn invalid_service_account_impersonation_url() {
        let config = json!({
            "type": "external_account",
            "audience": "audience",
            "subject_token_type": "subjectTokenType",
            "token_url": "https://www.sts.google.com",
            "service_account_impersonation_url": "invalid_url",
            "credential_source": {"file": "/var/run/token"}
        });
        let err = Builder::new(config).build().unwrap_err();
        assert!(err.is_invalid_impersonation_url(), "{err:?}");
        assert_eq!(
            err.to_string(),
            "Unable to determine target principal from service account impersonation URL."
        );
    }

    #[test]
    fn null_config() {
        let err = Builder::new(Value::Null).build().unwrap_err();
        assert!(err.is_precondition(), "{err:?}");
    }

    #[test]
    fn round_trip() -> TestResult {
        let config = json!({
            "type": "external_account",
            "audience": "audience",
            "subject_token_type": "subjectTokenType",
            "token_url": "https://www.sts.google.com",
            "token_info_url": "tokenInfoUrl",
            "credential_source": {
                "url": "https://metadata.example.com/token",
                "headers": {"Metadata": "True"}
            }
        });
        let creds = Builder::new(config).build()?;
        let again = Builder::new(creds.to_json()).build()?;
        assert_eq!(again.audience(), "audience");
        assert_eq!(again.subject_token_type(), "subjectTokenType");
        assert_eq!(again.token_url(), "https://www.sts.google.com");
        assert_eq!(again.token_info_url(), Some("tokenInfoUrl"));
        assert_eq!(again.credential_source().describe(), "url");
        Ok(())
    }
}
