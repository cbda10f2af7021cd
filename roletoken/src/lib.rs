//! Self-refreshing role tokens
//!
//! A [`RoleTokenCache`] hands out a role token for a single domain and role,
//! refreshing it from the token service whenever the cached token comes
//! within [`EXPIRATION_DRIFT`] of its expiry. Callers can additionally start
//! a background prefetcher that refreshes the token on a fixed interval, so
//! that readers rarely have to wait on the network.
//!
//! # General Flow
//!
//! Pick how the cache authenticates to the token service, either with a
//! principal token or with a TLS client certificate, and configure where the
//! service lives. The cache is then constructed once and shared by cloning.
//!
//! ```
//! use std::time::Duration;
//! use roletoken::{sources, CredentialMode, RoleTokenCache, RoleTokenOptions};
//!
//! # async fn run() -> Result<(), roletoken::Error> {
//! let credentials = CredentialMode::principal_token(
//!     sources::FilePrincipalToken::new("/var/lib/sia/tokens/api.ntoken"),
//! );
//!
//! let options = RoleTokenOptions::default()
//!     .with_base_url("https://zts.example.com:4443/zts/v1")
//!     .with_prefetch_interval(Duration::from_secs(5 * 60));
//!
//! let cache = RoleTokenCache::new("sports", "reader", credentials, options);
//! cache.start_prefetcher()?;
//!
//! let token = cache.role_token().await?;
//! tracing::info!(token = format_args!("{:#?}", token), "obtained role token");
//! # Ok(())
//! # }
//! ```
//!
//! Authenticating with a client certificate only changes the credential
//! mode; the certificate and key are re-read on every refresh.
//!
//! ```
//! use roletoken::CredentialMode;
//!
//! let credentials = CredentialMode::client_certificate(
//!     "/var/lib/sia/certs/sports.api.cert.pem",
//!     "/var/lib/sia/keys/sports.api.key.pem",
//! );
//! ```
//!
//! Errors from a refresh triggered by [`RoleTokenCache::role_token()`] are
//! returned to the caller, while errors from the prefetcher are logged and
//! retried on the next tick. A failed refresh never discards the token that
//! was cached before it.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
mod cache;
pub mod credentials;
pub mod error;
mod options;
mod prefetch;
pub mod sources;
mod tokens;

pub use braids::*;
pub use cache::RoleTokenCache;
pub use credentials::CredentialMode;
pub use error::Error;
pub use options::{
    Endpoint, RoleTokenOptions, DEFAULT_PREFETCH_INTERVAL, DEFAULT_PRINCIPAL_AUTH_HEADER,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use sources::RoleTokenSource;
pub use tokens::{CachedRoleToken, TokenStatus, EXPIRATION_DRIFT};
