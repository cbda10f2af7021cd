use std::{fmt, sync::Arc, time::Duration};

use reqwest::{header::HeaderName, Url};

use crate::error::ConfigurationError;

/// The header used to present a principal token unless configured otherwise
pub const DEFAULT_PRINCIPAL_AUTH_HEADER: &str = "Athenz-Principal-Auth";

/// How often the prefetcher refreshes when no interval is configured
pub const DEFAULT_PREFETCH_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// How long a single request to the token service may take by default
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Options controlling how role tokens are requested
///
/// The default value is a valid configuration except for the base URL of
/// the token service, which must always be supplied.
///
/// ```
/// use std::time::Duration;
/// use roletoken::RoleTokenOptions;
///
/// let options = RoleTokenOptions::default()
///     .with_base_url("https://zts.example.com:4443/zts/v1")
///     .with_max_expire(Duration::from_secs(2 * 60 * 60))
///     .with_prefetch_interval(Duration::from_secs(5 * 60));
/// ```
#[derive(Clone)]
pub struct RoleTokenOptions {
    base_url: Option<String>,
    proxy_url: Option<String>,
    min_expire: Duration,
    max_expire: Duration,
    principal_auth_header: String,
    ca_cert: Option<Arc<[u8]>>,
    prefetch_interval: Duration,
    request_timeout: Duration,
}

impl Default for RoleTokenOptions {
    fn default() -> Self {
        Self {
            base_url: None,
            proxy_url: None,
            min_expire: Duration::ZERO,
            max_expire: Duration::ZERO,
            principal_auth_header: DEFAULT_PRINCIPAL_AUTH_HEADER.to_owned(),
            ca_cert: None,
            prefetch_interval: Duration::ZERO,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl RoleTokenOptions {
    /// Sets the base URL of the token service, such as `https://zts.example.com:4443/zts/v1`
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Routes requests to the token service through a proxy
    pub fn with_proxy_url(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy_url = Some(proxy_url.into());
        self
    }

    /// Sets the minimum lifetime to request; zero leaves it to the server
    pub fn with_min_expire(mut self, min_expire: Duration) -> Self {
        self.min_expire = min_expire;
        self
    }

    /// Sets the maximum lifetime to request; zero leaves it to the server
    pub fn with_max_expire(mut self, max_expire: Duration) -> Self {
        self.max_expire = max_expire;
        self
    }

    /// Sets the header used to present a principal token
    pub fn with_principal_auth_header(mut self, header: impl Into<String>) -> Self {
        self.principal_auth_header = header.into();
        self
    }

    /// Trusts only the PEM-encoded CA certificates given when connecting to the token service
    pub fn with_ca_cert(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_cert = Some(Arc::from(pem.into()));
        self
    }

    /// Sets the interval of background refreshes; zero uses [`DEFAULT_PREFETCH_INTERVAL`]
    pub fn with_prefetch_interval(mut self, interval: Duration) -> Self {
        self.prefetch_interval = interval;
        self
    }

    /// Sets the timeout of each request to the token service; zero disables it
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The configured minimum lifetime hint
    pub fn min_expire(&self) -> Duration {
        self.min_expire
    }

    /// The configured maximum lifetime hint
    pub fn max_expire(&self) -> Duration {
        self.max_expire
    }

    /// The interval the prefetcher will run at
    pub fn prefetch_interval(&self) -> Duration {
        if self.prefetch_interval.is_zero() {
            DEFAULT_PREFETCH_INTERVAL
        } else {
            self.prefetch_interval
        }
    }

    pub(crate) fn validate(&self) -> Result<ValidatedOptions, ConfigurationError> {
        let raw = self
            .base_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or(ConfigurationError::MissingBaseUrl)?;

        let base_url = Url::parse(raw).map_err(|source| ConfigurationError::InvalidBaseUrl {
            url: raw.to_owned(),
            source,
        })?;

        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(ConfigurationError::UnsupportedBaseUrl {
                url: raw.to_owned(),
            });
        }

        let proxy = match self.proxy_url.as_deref().filter(|p| !p.is_empty()) {
            Some(raw) => Some(Url::parse(raw).map_err(|source| {
                ConfigurationError::InvalidProxyUrl {
                    url: raw.to_owned(),
                    source,
                }
            })?),
            None => None,
        };

        let principal_auth_header = HeaderName::from_bytes(self.principal_auth_header.as_bytes())
            .map_err(|source| ConfigurationError::InvalidAuthHeader {
                header: self.principal_auth_header.clone(),
                source,
            })?;

        Ok(ValidatedOptions {
            endpoint: Endpoint {
                base_url,
                proxy,
                ca_cert: self.ca_cert.clone(),
                timeout: Some(self.request_timeout).filter(|t| !t.is_zero()),
            },
            principal_auth_header,
        })
    }
}

impl fmt::Debug for RoleTokenOptions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RoleTokenOptions")
            .field("base_url", &self.base_url)
            .field("proxy_url", &self.proxy_url)
            .field("min_expire", &self.min_expire)
            .field("max_expire", &self.max_expire)
            .field("principal_auth_header", &self.principal_auth_header)
            .field("ca_cert", &self.ca_cert.as_ref().map(|c| c.len()))
            .field("prefetch_interval", &self.prefetch_interval)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Debug)]
pub(crate) struct ValidatedOptions {
    pub(crate) endpoint: Endpoint,
    pub(crate) principal_auth_header: HeaderName,
}

/// Where and how to reach the token service
#[derive(Clone)]
pub struct Endpoint {
    base_url: Url,
    proxy: Option<Url>,
    ca_cert: Option<Arc<[u8]>>,
    timeout: Option<Duration>,
}

impl Endpoint {
    /// The base URL of the token service
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The proxy to route requests through, if any
    pub fn proxy(&self) -> Option<&Url> {
        self.proxy.as_ref()
    }

    /// PEM-encoded CA certificates replacing the built-in trust roots, if any
    pub fn ca_cert(&self) -> Option<&[u8]> {
        self.ca_cert.as_deref()
    }

    /// The timeout to apply to each request, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Resolves a path below the base URL
    pub fn join_segments<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("base_url", &self.base_url.as_str())
            .field("proxy", &self.proxy.as_ref().map(Url::as_str))
            .field("ca_cert", &self.ca_cert.as_ref().map(|c| c.len()))
            .field("timeout", &self.timeout)
            .finish()
    }
}
