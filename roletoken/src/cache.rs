use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use roletoken_clock::{Clock, DurationSecs, System};
use tokio::sync::RwLock;

use crate::{
    credentials::CredentialMode,
    error::ConfigurationError,
    options::RoleTokenOptions,
    prefetch::PrefetchTask,
    sources::{RoleTokenIssuer, RoleTokenRequest, RoleTokenSource, ZtsIssuer},
    tokens::CachedRoleToken,
    DomainName, Error, RoleName, RoleToken,
};

/// A self-refreshing cache of the role token for a single domain and role
///
/// Cloning the cache is cheap; all clones share the same token and the
/// same prefetcher.
///
/// A cached token is handed out until it comes within
/// [`EXPIRATION_DRIFT`](crate::EXPIRATION_DRIFT) of its expiry, at which
/// point the caller refreshes it from the token service. Refreshes are
/// serialized: a refresh holds the token exclusively until the new token is
/// stored, and readers wait for it to finish. Callers that all find the
/// token stale each perform their own refresh in turn.
///
/// A failed refresh leaves the previously cached token in place and the
/// error is returned to the caller. Nothing is retried internally.
pub struct RoleTokenCache<I = ZtsIssuer, C = System> {
    pub(crate) inner: Arc<Inner<I, C>>,
}

pub(crate) struct Inner<I, C> {
    domain: DomainName,
    role: RoleName,
    credentials: CredentialMode,
    pub(crate) options: RoleTokenOptions,
    issuer: I,
    clock: C,
    current: RwLock<Option<CachedRoleToken>>,
    pub(crate) prefetcher: Mutex<Option<PrefetchTask>>,
}

impl RoleTokenCache {
    /// Constructs a cache that requests tokens from the token service
    ///
    /// No request is made until a token is first needed.
    pub fn new(
        domain: impl Into<DomainName>,
        role: impl Into<RoleName>,
        credentials: CredentialMode,
        options: RoleTokenOptions,
    ) -> Self {
        Self::new_with_issuer(domain, role, credentials, options, ZtsIssuer::new())
    }
}

impl<I> RoleTokenCache<I, System> {
    /// Constructs a cache that requests tokens through a custom issuer
    pub fn new_with_issuer(
        domain: impl Into<DomainName>,
        role: impl Into<RoleName>,
        credentials: CredentialMode,
        options: RoleTokenOptions,
        issuer: I,
    ) -> Self {
        Self::new_with_issuer_and_clock(domain, role, credentials, options, issuer, System)
    }
}

impl<I, C> RoleTokenCache<I, C> {
    /// Constructs a cache using the given issuer and clock
    ///
    /// Useful for testing purposes
    pub fn new_with_issuer_and_clock(
        domain: impl Into<DomainName>,
        role: impl Into<RoleName>,
        credentials: CredentialMode,
        options: RoleTokenOptions,
        issuer: I,
        clock: C,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                domain: domain.into(),
                role: role.into(),
                credentials,
                options,
                issuer,
                clock,
                current: RwLock::new(None),
                prefetcher: Mutex::new(None),
            }),
        }
    }

    /// The domain this cache requests tokens for
    pub fn domain(&self) -> &DomainName {
        &self.inner.domain
    }

    /// The role this cache requests tokens for
    pub fn role(&self) -> &RoleName {
        &self.inner.role
    }

    /// A copy of the currently cached token, without refreshing it
    pub async fn cached(&self) -> Option<CachedRoleToken> {
        self.inner.current.read().await.clone()
    }

    /// Whether the background prefetcher is currently running
    pub fn is_prefetching(&self) -> bool {
        self.inner
            .prefetcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl<I, C> RoleTokenCache<I, C>
where
    I: RoleTokenIssuer,
    C: Clock + Send + Sync,
{
    /// Gets a role token that is not within the expiration drift of its expiry
    ///
    /// Returns the cached token without contacting the token service when
    /// possible. Otherwise the token is refreshed before returning, and any
    /// error from the refresh is returned unchanged.
    pub async fn role_token(&self) -> Result<RoleToken, Error> {
        {
            let current = self.inner.current.read().await;
            let now = self.inner.clock.now();
            match current.as_ref() {
                Some(cached) if !cached.needs_refresh_at(now) => {
                    tracing::trace!(
                        expiry = cached.expiry().0,
                        until_stale = (cached.stale() - now).0,
                        "using cached role token"
                    );
                    return Ok(cached.token().to_owned());
                }
                Some(cached) => {
                    tracing::debug!(
                        expiry = cached.expiry().0,
                        "cached role token is due for refresh"
                    );
                }
                None => {
                    tracing::debug!("no role token cached yet");
                }
            }
        }

        self.refresh().await
    }

    /// Requests a new role token from the token service and caches it
    ///
    /// The cached token is replaced only if the request succeeds.
    pub async fn refresh(&self) -> Result<RoleToken, Error> {
        self.inner.refresh().await
    }
}

fn expiry_hint(d: Duration) -> Option<DurationSecs> {
    let secs = DurationSecs::from_duration_lossy(d);
    if secs.0 == 0 {
        None
    } else {
        Some(secs)
    }
}

impl<I, C> Inner<I, C>
where
    I: RoleTokenIssuer,
    C: Clock + Send + Sync,
{
    #[tracing::instrument(
        err,
        skip(self),
        fields(domain = %self.domain, role = %self.role),
    )]
    pub(crate) async fn refresh(&self) -> Result<RoleToken, Error> {
        let validated = self.options.validate()?;
        if self.domain.as_str().is_empty() {
            return Err(ConfigurationError::EmptyDomain.into());
        }
        if self.role.as_str().is_empty() {
            return Err(ConfigurationError::EmptyRole.into());
        }

        let mut current = self.current.write().await;

        let credential = self
            .credentials
            .resolve(&validated.principal_auth_header)
            .await?;

        let request = RoleTokenRequest {
            domain: &self.domain,
            role: &self.role,
            min_expiry: expiry_hint(self.options.min_expire()),
            max_expiry: expiry_hint(self.options.max_expire()),
        };

        tracing::debug!(credential.kind = credential.kind(), "requesting new role token");
        let issued = self
            .issuer
            .issue_role_token(&validated.endpoint, credential, &request)
            .await?;

        tracing::info!(
            expiry = issued.expiry.0,
            lifetime = (issued.expiry - self.clock.now()).0,
            "received new role token"
        );

        let token = issued.token.clone();
        *current = Some(CachedRoleToken::new(issued.token, issued.expiry));
        Ok(token)
    }
}

impl<I, C> Clone for RoleTokenCache<I, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, C> fmt::Debug for RoleTokenCache<I, C>
where
    I: fmt::Debug,
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RoleTokenCache")
            .field("domain", &self.inner.domain)
            .field("role", &self.inner.role)
            .field("credentials", &self.inner.credentials)
            .field("options", &self.inner.options)
            .field("issuer", &self.inner.issuer)
            .field("clock", &self.inner.clock)
            .field("prefetching", &self.is_prefetching())
            .finish()
    }
}

#[async_trait]
impl<I, C> RoleTokenSource for RoleTokenCache<I, C>
where
    I: RoleTokenIssuer,
    C: Clock + Send + Sync,
{
    async fn role_token(&self) -> Result<RoleToken, Error> {
        RoleTokenCache::role_token(self).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    use color_eyre::Result;
    use roletoken_clock::{TestClock, UnixTime};

    use super::*;
    use crate::{
        credentials::Credential,
        error::{CredentialError, TransportError},
        options::Endpoint,
        sources::{IssuedRoleToken, PrincipalTokenSource, StaticPrincipalToken},
        PrincipalToken, EXPIRATION_DRIFT,
    };

    pub(crate) const T0: UnixTime = UnixTime(1_700_000_000);
    const MINUTE: DurationSecs = DurationSecs(60);

    fn minutes(n: u64) -> DurationSecs {
        DurationSecs(MINUTE.0 * n)
    }

    pub(crate) enum Scripted {
        Token(&'static str, UnixTime),
        Fail,
    }

    /// An issuer that replays scripted responses and watches for overlapping calls
    #[derive(Default)]
    pub(crate) struct StubIssuer {
        script: Mutex<VecDeque<Scripted>>,
        pub(crate) calls: AtomicUsize,
        in_flight: AtomicUsize,
        pub(crate) overlapped: AtomicBool,
        pub(crate) last_hints: Mutex<Option<(Option<DurationSecs>, Option<DurationSecs>)>>,
        delay: Option<Duration>,
    }

    impl StubIssuer {
        pub(crate) fn scripted(script: impl IntoIterator<Item = Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().collect()),
                ..Self::default()
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay: Some(delay),
                ..Self::default()
            })
        }

        fn push(&self, response: Scripted) {
            self.script.lock().unwrap().push_back(response);
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RoleTokenIssuer for Arc<StubIssuer> {
        async fn issue_role_token(
            &self,
            _: &Endpoint,
            _: Credential,
            request: &RoleTokenRequest<'_>,
        ) -> Result<IssuedRoleToken, Error> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            *self.last_hints.lock().unwrap() = Some((request.min_expiry, request.max_expiry));

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let next = self.script.lock().unwrap().pop_front();
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match next {
                Some(Scripted::Token(token, expiry)) => Ok(IssuedRoleToken {
                    token: RoleToken::from_static(token),
                    expiry,
                }),
                Some(Scripted::Fail) => {
                    Err(TransportError::Issuer("token service unavailable".into()).into())
                }
                None => Ok(IssuedRoleToken {
                    token: RoleToken::new(format!("token-{}", n)),
                    expiry: T0 + DurationSecs(n as u64),
                }),
            }
        }
    }

    pub(crate) fn options() -> RoleTokenOptions {
        RoleTokenOptions::default().with_base_url("https://zts.example.com:4443/zts/v1")
    }

    pub(crate) fn principal() -> CredentialMode {
        CredentialMode::principal_token(StaticPrincipalToken::new("v=U1;d=sports;n=api"))
    }

    fn cache_with(
        issuer: &Arc<StubIssuer>,
        options: RoleTokenOptions,
        clock: &TestClock,
    ) -> RoleTokenCache<Arc<StubIssuer>, TestClock> {
        RoleTokenCache::new_with_issuer_and_clock(
            DomainName::from_static("sports"),
            RoleName::from_static("reader"),
            principal(),
            options,
            Arc::clone(issuer),
            clock.clone(),
        )
    }

    #[tokio::test]
    async fn refreshes_only_once_token_enters_drift_window() -> Result<()> {
        let clock = TestClock::new(T0);
        let issuer = StubIssuer::scripted([
            Scripted::Token("ABC", T0 + minutes(15)),
            Scripted::Token("XYZ", T0 + minutes(6) + minutes(15)),
        ]);
        let cache = cache_with(&issuer, options(), &clock);

        assert_eq!(cache.role_token().await?.as_str(), "ABC");
        assert_eq!(issuer.calls(), 1);

        clock.advance(minutes(1));
        assert_eq!(cache.role_token().await?.as_str(), "ABC");
        assert_eq!(issuer.calls(), 1);

        clock.advance(minutes(5));
        assert_eq!(cache.role_token().await?.as_str(), "XYZ");
        assert_eq!(issuer.calls(), 2);

        let cached = cache.cached().await.expect("token cached");
        assert_eq!(cached.expiry(), T0 + minutes(21));

        Ok(())
    }

    #[tokio::test]
    async fn refreshes_exactly_at_drift_boundary() -> Result<()> {
        let clock = TestClock::new(T0);
        let issuer = StubIssuer::scripted([
            Scripted::Token("first", T0 + minutes(30)),
            Scripted::Token("second", T0 + minutes(90)),
        ]);
        let cache = cache_with(&issuer, options(), &clock);

        cache.role_token().await?;

        clock.set(T0 + minutes(30) - EXPIRATION_DRIFT - DurationSecs(1));
        assert_eq!(cache.role_token().await?.as_str(), "first");
        assert_eq!(issuer.calls(), 1);

        clock.advance(DurationSecs(1));
        assert_eq!(cache.role_token().await?.as_str(), "second");
        assert_eq!(issuer.calls(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_token() -> Result<()> {
        let clock = TestClock::new(T0);
        let issuer = StubIssuer::scripted([
            Scripted::Token("T1", T0 + minutes(60)),
            Scripted::Fail,
            Scripted::Fail,
        ]);
        let cache = cache_with(&issuer, options(), &clock);

        assert_eq!(cache.role_token().await?.as_str(), "T1");

        clock.advance(minutes(55));
        let err = cache.role_token().await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Issuer(_))));

        let cached = cache.cached().await.expect("token still cached");
        assert_eq!(cached.token().as_str(), "T1");
        assert_eq!(cached.expiry(), T0 + minutes(60));

        assert!(cache.role_token().await.is_err());
        assert_eq!(issuer.calls(), 3);

        issuer.push(Scripted::Token("T2", T0 + minutes(120)));
        assert_eq!(cache.role_token().await?.as_str(), "T2");
        assert_eq!(issuer.calls(), 4);

        Ok(())
    }

    #[tokio::test]
    async fn first_request_failure_leaves_cache_empty() {
        let clock = TestClock::new(T0);
        let issuer = StubIssuer::scripted([Scripted::Fail]);
        let cache = cache_with(&issuer, options(), &clock);

        assert!(cache.role_token().await.is_err());
        assert!(cache.cached().await.is_none());
    }

    #[tokio::test]
    async fn missing_base_url_fails_without_calling_issuer() {
        let clock = TestClock::new(T0);
        let issuer = StubIssuer::scripted([]);
        let cache = cache_with(&issuer, RoleTokenOptions::default(), &clock);

        let err = cache.role_token().await.unwrap_err();

        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::MissingBaseUrl)
        ));
        assert_eq!(issuer.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_proxy_fails_without_calling_issuer() {
        let clock = TestClock::new(T0);
        let issuer = StubIssuer::scripted([]);
        let cache = cache_with(&issuer, options().with_proxy_url("http://[::1"), &clock);

        let err = cache.refresh().await.unwrap_err();

        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::InvalidProxyUrl { .. })
        ));
        assert_eq!(issuer.calls(), 0);
    }

    #[tokio::test]
    async fn empty_role_is_a_configuration_error() {
        let issuer = StubIssuer::scripted([]);
        let cache = RoleTokenCache::new_with_issuer(
            "sports",
            "",
            principal(),
            options(),
            Arc::clone(&issuer),
        );

        let err = cache.role_token().await.unwrap_err();

        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::EmptyRole)
        ));
        assert_eq!(issuer.calls(), 0);
    }

    #[tokio::test]
    async fn unreadable_certificate_fails_without_calling_issuer() {
        let issuer = StubIssuer::scripted([]);
        let cache = RoleTokenCache::new_with_issuer(
            "sports",
            "reader",
            CredentialMode::client_certificate(
                "/nonexistent/roletoken/service.cert.pem",
                "/nonexistent/roletoken/service.key.pem",
            ),
            options(),
            Arc::clone(&issuer),
        );

        let err = cache.role_token().await.unwrap_err();

        assert!(matches!(
            err,
            Error::Credential(CredentialError::ReadCertificate { .. })
        ));
        assert_eq!(issuer.calls(), 0);
    }

    struct FailingPrincipal;

    #[async_trait]
    impl PrincipalTokenSource for FailingPrincipal {
        async fn principal_token(&self) -> Result<PrincipalToken, crate::error::BoxError> {
            Err("agent has not written a token yet".into())
        }
    }

    #[tokio::test]
    async fn principal_failure_is_a_credential_error() {
        let issuer = StubIssuer::scripted([]);
        let cache = RoleTokenCache::new_with_issuer(
            "sports",
            "reader",
            CredentialMode::principal_token(FailingPrincipal),
            options(),
            Arc::clone(&issuer),
        );

        let err = cache.role_token().await.unwrap_err();

        assert!(matches!(
            err,
            Error::Credential(CredentialError::PrincipalTokenUnavailable(_))
        ));
        assert_eq!(issuer.calls(), 0);
    }

    #[tokio::test]
    async fn expiry_hints_are_whole_seconds_and_zero_is_omitted() -> Result<()> {
        let clock = TestClock::new(T0);
        let issuer = StubIssuer::scripted([]);
        let cache = cache_with(
            &issuer,
            options()
                .with_min_expire(Duration::ZERO)
                .with_max_expire(Duration::from_millis(3_600_500)),
            &clock,
        );

        cache.refresh().await?;

        let hints = *issuer.last_hints.lock().unwrap();
        assert_eq!(hints, Some((None, Some(DurationSecs(3600)))));

        Ok(())
    }

    #[tokio::test]
    async fn sub_second_hint_is_omitted() -> Result<()> {
        let clock = TestClock::new(T0);
        let issuer = StubIssuer::scripted([]);
        let cache = cache_with(
            &issuer,
            options().with_min_expire(Duration::from_millis(400)),
            &clock,
        );

        cache.refresh().await?;

        let hints = *issuer.last_hints.lock().unwrap();
        assert_eq!(hints, Some((None, None)));

        Ok(())
    }

    #[tokio::test]
    async fn explicit_refresh_replaces_fresh_token() -> Result<()> {
        let clock = TestClock::new(T0);
        let issuer = StubIssuer::scripted([
            Scripted::Token("one", T0 + minutes(60)),
            Scripted::Token("two", T0 + minutes(61)),
        ]);
        let cache = cache_with(&issuer, options(), &clock);

        cache.role_token().await?;
        assert_eq!(cache.refresh().await?.as_str(), "two");
        assert_eq!(cache.role_token().await?.as_str(), "two");
        assert_eq!(issuer.calls(), 2);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stale_readers_refresh_one_at_a_time() -> Result<()> {
        let issuer = StubIssuer::slow(Duration::from_millis(20));
        let cache = RoleTokenCache::new_with_issuer_and_clock(
            "sports",
            "reader",
            principal(),
            options(),
            Arc::clone(&issuer),
            TestClock::new(T0),
        );

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.role_token().await })
            })
            .collect();

        for reader in readers {
            reader.await??;
        }

        assert_eq!(issuer.calls(), 8);
        assert!(!issuer.overlapped.load(Ordering::SeqCst));

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_observe_mismatched_expiry() -> Result<()> {
        // Every refresh `n` issues `token-n` expiring at `T0 + n`, so each
        // observed pair must agree.
        let issuer = StubIssuer::slow(Duration::from_millis(1));
        let cache = RoleTokenCache::new_with_issuer_and_clock(
            "sports",
            "reader",
            principal(),
            options(),
            Arc::clone(&issuer),
            TestClock::new(T0),
        );

        let writer = {
            let cache = cache.clone();
            tokio::spawn(async move {
                for _ in 0..25 {
                    cache.refresh().await?;
                }
                Ok::<_, Error>(())
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    for _ in 0..200 {
                        if let Some(cached) = cache.cached().await {
                            let n: u64 = cached
                                .token()
                                .as_str()
                                .trim_start_matches("token-")
                                .parse()
                                .expect("stub token format");
                            assert_eq!(cached.expiry(), T0 + DurationSecs(n));
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        writer.await??;
        for reader in readers {
            reader.await?;
        }

        assert!(!issuer.overlapped.load(Ordering::SeqCst));
        Ok(())
    }

    #[tokio::test]
    async fn cache_is_a_role_token_source() -> Result<()> {
        let clock = TestClock::new(T0);
        let issuer = StubIssuer::scripted([Scripted::Token("shared", T0 + minutes(60))]);
        let source: Box<dyn RoleTokenSource> = Box::new(cache_with(&issuer, options(), &clock));

        assert_eq!(source.role_token().await?.as_str(), "shared");
        Ok(())
    }
}
