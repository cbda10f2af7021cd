//! Middleware to automatically attach role tokens to outgoing requests
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`RoleTokenMiddleware`] in the middleware stack to attach
//! the current role token provided by a [`RoleTokenSource`], usually a
//! [`RoleTokenCache`](roletoken::RoleTokenCache), to each outbound request.
//!
//! If a request already carries a value for the role token header by the
//! time that the middleware executes, the existing value will be left in
//! place, allowing overrides to be specified as required.
//!
//! ```
//! use roletoken::{sources, CredentialMode, RoleTokenCache, RoleTokenOptions};
//! use roletoken_reqwest::RoleTokenMiddleware;
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! let cache = RoleTokenCache::new(
//!     "sports",
//!     "reader",
//!     CredentialMode::principal_token(sources::StaticPrincipalToken::new("v=U1;d=sports;n=api")),
//!     RoleTokenOptions::default().with_base_url("https://zts.example.com:4443/zts/v1"),
//! );
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(RoleTokenMiddleware::new(cache))
//!     .build();
//!
//! let req = client.get("https://api.example.com/scores");
//! ```
//!
//! The middleware can also be configured to add a role token only
//! conditionally. This can be useful in the event that you want to use a
//! single common middleware stack with multiple potential backends and want
//! to ensure that specific tokens are only sent to specific backends.
//!
//! These predicates can be composed together to evaluate more complex
//! requirements prior to attaching a token to a request.
//!
//! ```
//! use roletoken_reqwest::{ExactHostMatch, HttpsOnly, RoleTokenMiddleware};
//! use predicates::prelude::PredicateBooleanExt;
//! # use roletoken::{sources, CredentialMode, RoleTokenCache, RoleTokenOptions};
//! # let cache = RoleTokenCache::new(
//! #     "sports",
//! #     "reader",
//! #     CredentialMode::client_certificate("api.cert.pem", "api.key.pem"),
//! #     RoleTokenOptions::default(),
//! # );
//!
//! RoleTokenMiddleware::new(cache)
//!     .with_predicate(HttpsOnly.and(ExactHostMatch::new("api.example.com")));
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::{fmt, sync::Arc};

use predicates::{prelude::*, reflection};
use reqwest::{
    header::{HeaderName, HeaderValue, InvalidHeaderValue},
    Request, Response,
};
use reqwest_middleware::{Middleware, Next, Result};
use roletoken::RoleTokenSource;

/// The header role tokens are attached under unless configured otherwise
pub const DEFAULT_ROLE_AUTH_HEADER: &str = "Athenz-Role-Auth";

/// A middleware that injects a role token into outgoing requests
#[derive(Clone)]
pub struct RoleTokenMiddleware<P> {
    source: Arc<dyn RoleTokenSource>,
    header: HeaderName,
    predicate: P,
}

impl RoleTokenMiddleware<HttpsOnly> {
    /// Construct a new middleware from a role token source
    ///
    /// By default, this middleware will only send its token if the request
    /// is being sent via HTTPS, and sends it in the
    /// [`Athenz-Role-Auth`](DEFAULT_ROLE_AUTH_HEADER) header. To change this
    /// behavior, provide a custom predicate with
    /// [`with_predicate()`][Self::with_predicate()] or a custom header with
    /// [`with_header()`][Self::with_header()].
    pub fn new(source: impl RoleTokenSource + 'static) -> Self {
        Self {
            source: Arc::new(source),
            header: HeaderName::from_static("athenz-role-auth"),
            predicate: HttpsOnly,
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> RoleTokenMiddleware<P> {
        RoleTokenMiddleware {
            source: self.source,
            header: self.header,
            predicate,
        }
    }
}

impl<P> RoleTokenMiddleware<P> {
    /// Sends the role token in `header` instead of the default header
    pub fn with_header(mut self, header: HeaderName) -> Self {
        self.header = header;
        self
    }

    async fn header_value_from_source(&self) -> std::result::Result<HeaderValue, AttachError> {
        let token = self
            .source
            .role_token()
            .await
            .map_err(AttachError::Unavailable)?;

        tracing::trace!(
            header = %self.header,
            token = format_args!("{:#?}", token),
            "obtained role token"
        );

        let mut value =
            HeaderValue::from_str(token.as_str()).map_err(AttachError::InvalidHeaderValue)?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl<P: fmt::Debug> fmt::Debug for RoleTokenMiddleware<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleTokenMiddleware")
            .field("header", &self.header)
            .field("predicate", &self.predicate)
            .finish_non_exhaustive()
    }
}

/// An error preventing a role token from being attached to a request
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    /// The role token source failed to produce a token
    #[error("unable to obtain role token")]
    Unavailable(#[source] roletoken::Error),
    /// The role token cannot be sent as a header value
    #[error("role token is not a valid header value")]
    InvalidHeaderValue(#[source] InvalidHeaderValue),
}

#[async_trait::async_trait]
impl<P> Middleware for RoleTokenMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) && !req.headers().contains_key(&self.header) {
            let value = self.header_value_from_source().await.map_err(|error| {
                let source: &(dyn std::error::Error + 'static) = &error;
                tracing::warn!(
                    error = source,
                    url = %req.url(),
                    "unable to attach role token"
                );
                reqwest_middleware::Error::middleware(error)
            })?;
            req.headers_mut().insert(self.header.clone(), value);
        }

        next.run(req, extensions).await
    }
}

fn reflect<'a, P>(
    predicate: &'a P,
    expected: bool,
    actual: bool,
    name: &'static str,
    observed: impl fmt::Display + Send + Sync + 'static,
) -> Option<reflection::Case<'a>>
where
    P: reflection::PredicateReflection,
{
    (actual != expected).then(|| {
        reflection::Case::new(Some(predicate), actual)
            .add_product(reflection::Product::new(name, observed))
    })
}

/// Only attach a role token if the request is being sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        reflect(
            self,
            expected,
            self.eval(req),
            "scheme",
            req.url().scheme().to_owned(),
        )
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme == https")
    }
}

/// Only attach a role token if the request is being sent to exactly this host
///
/// The port is not considered.
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    host: String,
}

impl ExactHostMatch {
    /// Matches requests whose URL host equals `host`
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl Predicate<Request> for ExactHostMatch {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().host_str() == Some(self.host.as_str())
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        reflect(
            self,
            expected,
            self.eval(req),
            "host",
            req.url().host_str().unwrap_or_default().to_owned(),
        )
    }
}

impl reflection::PredicateReflection for ExactHostMatch {}
impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host == {}", self.host)
    }
}
