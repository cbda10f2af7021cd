use roletoken_clock::{Clock, DurationSecs, System, UnixTime};

use crate::{RoleToken, RoleTokenRef};

/// The margin before expiry at which a cached role token is refreshed
///
/// A token is due for refresh once `now + EXPIRATION_DRIFT >= expiry`.
pub const EXPIRATION_DRIFT: DurationSecs = DurationSecs(10 * 60);

/// A role token paired with the expiry reported by the token service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedRoleToken {
    token: RoleToken,
    expiry: UnixTime,
}

/// A cached token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token can be handed out without contacting the token service
    Fresh,
    /// The token is still valid, but within the expiration drift
    Stale,
    /// The token is no longer valid
    Expired,
}

impl CachedRoleToken {
    /// Pairs a token with its expiry
    pub fn new(token: RoleToken, expiry: UnixTime) -> Self {
        Self { token, expiry }
    }

    /// Gets the role token
    #[inline]
    pub fn token(&self) -> &RoleTokenRef {
        &self.token
    }

    /// Gets the time that the token will expire
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// Gets the time from which the token is due for refresh
    #[inline]
    pub fn stale(&self) -> UnixTime {
        self.expiry - EXPIRATION_DRIFT
    }

    /// Gets the token's current lifetime status
    #[inline]
    pub fn token_status(&self) -> TokenStatus {
        self.token_status_with_clock(&System)
    }

    /// Gets the token's lifetime status based on the current time
    /// as reported by the provided clock
    #[inline]
    pub fn token_status_with_clock<C: Clock>(&self, clock: &C) -> TokenStatus {
        self.token_status_at(clock.now())
    }

    /// Gets the token's lifetime status as of the provided time
    pub fn token_status_at(&self, time: UnixTime) -> TokenStatus {
        if time + EXPIRATION_DRIFT < self.expiry {
            TokenStatus::Fresh
        } else if time < self.expiry {
            TokenStatus::Stale
        } else {
            TokenStatus::Expired
        }
    }

    /// Whether the token should be refreshed before being handed out at `time`
    #[inline]
    pub fn needs_refresh_at(&self, time: UnixTime) -> bool {
        self.token_status_at(time) != TokenStatus::Fresh
    }
}
