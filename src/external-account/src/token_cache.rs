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
use crate::token::{Token, TokenProvider};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Caches the token produced by a [TokenProvider] and serializes refreshes.
///
/// At most one refresh runs at a time. Callers that queue behind an
/// in-flight refresh receive its outcome, token or error, instead of starting
/// a new round-trip.
#[derive(Debug)]
pub(crate) struct TokenCache<T>
where
    T: TokenProvider,
{
    // The cached token and the outcome of the last refresh.
    state: Arc<Mutex<State>>,

    // Held for the duration of a refresh.
    refresh_in_progress: Arc<Mutex<()>>,

    // The token provider. This thing does the refreshing.
    inner: Arc<T>,
}

#[derive(Debug, Default)]
struct State {
    // The last token successfully obtained. Survives failed refreshes.
    token: Option<Token>,
    // Incremented each time a refresh completes.
    generation: u64,
    // The outcome of the most recent refresh.
    last: Option<Result<Token>>,
}

// Manual impl, `T` need not be `Clone` as we only hold an `Arc<T>`.
impl<T: TokenProvider> Clone for TokenCache<T> {
    fn clone(&self) -> TokenCache<T> {
        TokenCache {
            state: self.state.clone(),
            refresh_in_progress: self.refresh_in_progress.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T: TokenProvider> TokenCache<T> {
    pub(crate) fn new(inner: T) -> TokenCache<T> {
        TokenCache {
            state: Arc::new(Mutex::new(State::default())),
            refresh_in_progress: Arc::new(Mutex::new(())),
            inner: Arc::new(inner),
        }
    }

    /// Returns the cached token, refreshing it first if it is missing or
    /// expired.
    ///
    /// An expired token is never returned. If the refresh fails the error is
    /// returned.
    pub(crate) async fn token(&self) -> Result<Token> {
        let seen = {
            let state = self.state.lock().await;
            match &state.token {
                Some(token) if !token.is_expired() => return Ok(token.clone()),
                _ => state.generation,
            }
        };
        self.refresh_after(seen).await
    }

    /// Obtains a new token unconditionally.
    ///
    /// On success the new token replaces the cached one. On failure the
    /// cached token, if any, is left in place.
    pub(crate) async fn refresh(&self) -> Result<Token> {
        let seen = self.state.lock().await.generation;
        self.refresh_after(seen).await
    }

    /// Runs a refresh unless one completed after `seen` was observed, in
    /// which case that refresh's outcome is returned.
    async fn refresh_after(&self, seen: u64) -> Result<Token> {
        let _guard = self.refresh_in_progress.lock().await;
        {
            let state = self.state.lock().await;
            if let Some(last) = state.last.as_ref().filter(|_| state.generation != seen) {
                tracing::debug!("sharing the result of a concurrent token refresh");
                return last.clone();
            }
        }

        let result = self.inner.token().await;

        let mut state = self.state.lock().await;
        state.generation += 1;
        match &result {
            Ok(token) => state.token = Some(token.clone()),
            Err(e) => tracing::debug!("token refresh failed: {e}"),
        }
        state.last = Some(result.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CredentialsError;
    use crate::token::tests::MockTokenProvider;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::time::Instant;

    static TOKEN_VALID_DURATION: Duration = Duration::from_secs(3600);

    fn test_token(value: &str, expires_at: Option<Instant>) -> Token {
        Token {
            token: value.to_string(),
            token_type: "Bearer".to_string(),
            expires_at,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn initial_token_success() {
        let expected = test_token("test-token", None);
        let expected_clone = expected.clone();

        let mut mock = MockTokenProvider::new();
        mock.expect_token()
            .times(1)
            .return_once(|| Ok(expected_clone));

        let cache = TokenCache::new(mock);
        let actual = cache.token().await.unwrap();
        assert_eq!(actual, expected);

        // The second call is served from the cache.
        let actual = cache.token().await.unwrap();
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn initial_token_failure() {
        let mut mock = MockTokenProvider::new();
        mock.expect_token()
            .times(2)
            .returning(|| Err(CredentialsError::from_msg(false, "fail")));

        let cache = TokenCache::new(mock);
        assert!(cache.token().await.is_err());

        // Errors are not cached, the next call tries again.
        assert!(cache.token().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_token_success() {
        let now = Instant::now();
        let initial = test_token("initial-token", Some(now + TOKEN_VALID_DURATION));
        let initial_clone = initial.clone();
        let refresh = test_token("refresh-token", Some(now + 2 * TOKEN_VALID_DURATION));
        let refresh_clone = refresh.clone();

        let mut mock = MockTokenProvider::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_token()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|| Ok(initial_clone));
        mock.expect_token()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|| Ok(refresh_clone));

        let cache = TokenCache::new(mock);
        let actual = cache.token().await.unwrap();
        assert_eq!(actual, initial);

        tokio::time::advance(TOKEN_VALID_DURATION).await;

        let actual = cache.token().await.unwrap();
        assert_eq!(actual, refresh);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_token_failure() {
        let initial = test_token(
            "initial-token",
            Some(Instant::now() + TOKEN_VALID_DURATION),
        );
        let initial_clone = initial.clone();

        let mut mock = MockTokenProvider::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_token()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|| Ok(initial_clone));
        mock.expect_token()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|| Err(CredentialsError::from_msg(false, "fail")));

        let cache = TokenCache::new(mock);
        let actual = cache.token().await.unwrap();
        assert_eq!(actual, initial);

        tokio::time::advance(TOKEN_VALID_DURATION).await;

        // The error is surfaced, never the expired token.
        let err = cache.token().await.unwrap_err();
        assert!(err.to_string().contains("fail"), "{err}");
    }

    #[tokio::test]
    async fn forced_refresh_replaces_token() {
        let initial = test_token("initial-token", None);
        let initial_clone = initial.clone();
        let refresh = test_token("refresh-token", None);
        let refresh_clone = refresh.clone();

        let mut mock = MockTokenProvider::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_token()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|| Ok(initial_clone));
        mock.expect_token()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|| Ok(refresh_clone));

        let cache = TokenCache::new(mock);
        assert_eq!(cache.token().await.unwrap(), initial);
        assert_eq!(cache.refresh().await.unwrap(), refresh);
        assert_eq!(cache.token().await.unwrap(), refresh);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_cached_token() {
        let initial = test_token("initial-token", None);
        let initial_clone = initial.clone();

        let mut mock = MockTokenProvider::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_token()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|| Ok(initial_clone));
        mock.expect_token()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|| Err(CredentialsError::from_msg(true, "fail")));

        let cache = TokenCache::new(mock);
        assert_eq!(cache.token().await.unwrap(), initial);
        let err = cache.refresh().await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");

        // The cached token is still valid and served without a new call.
        assert_eq!(cache.token().await.unwrap(), initial);
    }

    #[derive(Clone, Debug)]
    struct FakeTokenProvider {
        result: Result<Token>,
        calls: Arc<StdMutex<i32>>,
    }

    impl FakeTokenProvider {
        fn new(result: Result<Token>) -> Self {
            FakeTokenProvider {
                result,
                calls: Arc::new(StdMutex::new(0)),
            }
        }

        fn calls(&self) -> i32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl TokenProvider for FakeTokenProvider {
        async fn token(&self) -> Result<Token> {
            // Give the waiters in a thundering herd enough time to pile up.
            tokio::time::sleep(Duration::from_millis(50)).await;
            *self.calls.lock().unwrap() += 1;
            self.result.clone()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_refresh_single_round_trip() {
        let token = test_token("initial-token", None);
        let tp = FakeTokenProvider::new(Ok(token.clone()));
        let cache = TokenCache::new(tp.clone());

        let (a, b) = tokio::join!(cache.refresh(), cache.refresh());
        assert_eq!(a.unwrap(), token);
        assert_eq!(b.unwrap(), token);
        assert_eq!(tp.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_refresh_shares_error() {
        let tp = FakeTokenProvider::new(Err(CredentialsError::from_msg(false, "epic fail")));
        let cache = TokenCache::new(tp.clone());

        let (a, b) = tokio::join!(cache.refresh(), cache.token());
        for result in [a, b] {
            let e = result.unwrap_err().to_string();
            assert!(e.contains("epic fail"), "{e}");
        }
        assert_eq!(tp.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn initial_token_thundering_herd_success() {
        let token = test_token("initial-token", None);
        let tp = FakeTokenProvider::new(Ok(token.clone()));
        let cache = TokenCache::new(tp.clone());

        let tasks = (0..100)
            .map(|_| {
                let cache_clone = cache.clone();
                tokio::spawn(async move { cache_clone.token().await })
            })
            .collect::<Vec<_>>();

        for task in tasks {
            let actual = task.await.unwrap();
            assert_eq!(actual.unwrap(), token);
        }

        // Loose bound, tasks may start after the first refresh completes.
        let calls = tp.calls();
        assert!(calls < 100, "{calls}");
    }
}
