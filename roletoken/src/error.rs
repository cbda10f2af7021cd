//! Errors raised while obtaining role tokens

use std::{error, io, path::PathBuf};

use reqwest::header::{InvalidHeaderName, InvalidHeaderValue};
use thiserror::Error;

/// A boxed error, as returned by pluggable credential sources
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// An error while obtaining or managing a role token
#[derive(Debug, Error)]
pub enum Error {
    /// The cache is not configured well enough to contact the token service
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// The credential used to authenticate to the token service is unavailable
    #[error(transparent)]
    Credential(#[from] CredentialError),
    /// The token service could not be reached or rejected the request
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The prefetcher was asked to make a transition it cannot make
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// A problem with the static configuration of a role token cache
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// No base URL was configured for the token service
    #[error("base token service URL is not configured")]
    MissingBaseUrl,
    /// The base URL could not be parsed
    #[error("invalid base token service URL `{url}`")]
    InvalidBaseUrl {
        /// The configured value
        url: String,
        /// The parse failure
        source: url::ParseError,
    },
    /// The base URL is not an `http` or `https` URL that paths can be appended to
    #[error("unsupported base token service URL `{url}`")]
    UnsupportedBaseUrl {
        /// The configured value
        url: String,
    },
    /// The proxy URL could not be parsed
    #[error("invalid proxy URL `{url}`")]
    InvalidProxyUrl {
        /// The configured value
        url: String,
        /// The parse failure
        source: url::ParseError,
    },
    /// The principal authentication header is not a valid header name
    #[error("invalid principal authentication header `{header}`")]
    InvalidAuthHeader {
        /// The configured value
        header: String,
        /// The underlying failure
        source: InvalidHeaderName,
    },
    /// No domain was given
    #[error("domain must not be empty")]
    EmptyDomain,
    /// No role was given
    #[error("role must not be empty")]
    EmptyRole,
}

/// A failure to produce the credential presented to the token service
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The client certificate could not be read
    #[error("unable to read client certificate from {}", path.display())]
    ReadCertificate {
        /// The certificate path
        path: PathBuf,
        /// The I/O failure
        source: io::Error,
    },
    /// The client key could not be read
    #[error("unable to read client key from {}", path.display())]
    ReadKey {
        /// The key path
        path: PathBuf,
        /// The I/O failure
        source: io::Error,
    },
    /// The certificate and key do not form a usable TLS identity
    #[error("client certificate and key do not form a valid identity")]
    InvalidIdentity(#[source] reqwest::Error),
    /// The configured trust roots could not be parsed
    #[error("unable to parse CA certificates")]
    InvalidTrustRoots(#[source] reqwest::Error),
    /// The configured trust roots contain no certificates
    #[error("no CA certificates found in configured trust roots")]
    EmptyTrustRoots,
    /// The principal token source failed
    #[error("unable to obtain principal token")]
    PrincipalTokenUnavailable(#[source] BoxError),
    /// The principal token cannot be sent as a header value
    #[error("principal token is not a valid header value")]
    InvalidPrincipalToken(#[source] InvalidHeaderValue),
}

/// A failure while talking to the token service
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP client could not be constructed
    #[error("unable to build token service client")]
    ClientBuild(#[source] reqwest::Error),
    /// Unable to send the role token request
    #[error("error sending role token request")]
    RequestSend(#[source] reqwest::Error),
    /// The token service answered with an error status
    #[error("token service responded with status {status}: {body}")]
    ErrorWithBody {
        /// The HTTP status code
        status: u16,
        /// The underlying request error
        source: reqwest::Error,
        /// The body of the error
        body: String,
    },
    /// Unable to read the response
    #[error("error reading response body")]
    BodyRead(#[source] reqwest::Error),
    /// Unable to deserialize the token body
    #[error("error deserializing role token body")]
    TokenBody(#[from] serde_json::Error),
    /// A custom issuer failed
    #[error("role token issuer failed")]
    Issuer(#[source] BoxError),
}

/// An invalid prefetcher transition
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The prefetcher is already running
    #[error("prefetcher has already been started")]
    AlreadyRunning,
    /// The prefetcher is not running
    #[error("prefetcher has already been stopped")]
    AlreadyStopped,
    /// The prefetcher can only be started from within a tokio runtime
    #[error("prefetcher requires a tokio runtime")]
    NoRuntime,
}
