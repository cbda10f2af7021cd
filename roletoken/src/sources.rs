//! Sources of role tokens and of the credentials used to obtain them

use async_trait::async_trait;
use roletoken_clock::{DurationSecs, UnixTime};

use crate::{
    credentials::Credential, error::BoxError, options::Endpoint, DomainNameRef, Error,
    PrincipalToken, RoleToken, RoleNameRef,
};

pub mod principal;
pub mod zts;

pub use principal::{FilePrincipalToken, StaticPrincipalToken};
pub use zts::ZtsIssuer;

/// A request for a role token
#[derive(Clone, Copy, Debug)]
pub struct RoleTokenRequest<'a> {
    /// The domain the role belongs to
    pub domain: &'a DomainNameRef,
    /// The role to request a token for
    pub role: &'a RoleNameRef,
    /// The minimum lifetime to request, if any
    pub min_expiry: Option<DurationSecs>,
    /// The maximum lifetime to request, if any
    pub max_expiry: Option<DurationSecs>,
}

/// A role token as returned by the token service
#[derive(Debug)]
pub struct IssuedRoleToken {
    /// The role token
    pub token: RoleToken,
    /// When the role token expires
    pub expiry: UnixTime,
}

/// A service that issues role tokens
///
/// Calls from a single [`RoleTokenCache`](crate::RoleTokenCache) are
/// serialized, but implementations must tolerate concurrent calls from
/// independent caches.
#[async_trait]
pub trait RoleTokenIssuer: Send + Sync {
    /// Requests a role token from the service at `endpoint`, authenticating with `credential`
    async fn issue_role_token(
        &self,
        endpoint: &Endpoint,
        credential: Credential,
        request: &RoleTokenRequest<'_>,
    ) -> Result<IssuedRoleToken, Error>;
}

/// A source of principal tokens
#[async_trait]
pub trait PrincipalTokenSource: Send + Sync {
    /// Gets the current principal token
    async fn principal_token(&self) -> Result<PrincipalToken, BoxError>;
}

/// Anything that can hand out a currently valid role token
#[async_trait]
pub trait RoleTokenSource: Send + Sync {
    /// Gets a role token that is not about to expire
    async fn role_token(&self) -> Result<RoleToken, Error>;
}
