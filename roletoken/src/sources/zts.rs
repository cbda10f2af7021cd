//! A role token issuer that talks to the token service over HTTPS

use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity, Proxy};
use roletoken_clock::UnixTime;

use super::{IssuedRoleToken, RoleTokenIssuer, RoleTokenRequest};
use crate::{
    credentials::Credential,
    error::{CredentialError, TransportError},
    options::Endpoint,
    Error,
};

pub mod dto;

const USER_AGENT: &str = concat!("roletoken/", env!("CARGO_PKG_VERSION"));

/// Issues role tokens through the token service's REST API
///
/// Requests are made as `GET {base}/domain/{domain}/token?role={role}`,
/// with `minExpiryTime` and `maxExpiryTime` added when hints are given.
///
/// A new HTTP client is built for every request so that a rotated client
/// certificate takes effect on the next refresh.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZtsIssuer;

impl ZtsIssuer {
    /// Constructs a new issuer
    pub const fn new() -> Self {
        Self
    }
}

fn build_client(endpoint: &Endpoint, credential: &Credential) -> Result<Client, Error> {
    let mut builder = Client::builder().user_agent(USER_AGENT);

    if let Some(timeout) = endpoint.timeout() {
        builder = builder.timeout(timeout);
    }

    if let Credential::ClientIdentity {
        certificate_pem,
        key_pem,
    } = credential
    {
        let mut pem = Vec::with_capacity(certificate_pem.len() + key_pem.len() + 1);
        pem.extend_from_slice(certificate_pem);
        pem.push(b'\n');
        pem.extend_from_slice(key_pem);

        let identity = Identity::from_pem(&pem).map_err(CredentialError::InvalidIdentity)?;
        builder = builder.identity(identity);
    }

    if let Some(ca_cert) = endpoint.ca_cert() {
        let roots =
            Certificate::from_pem_bundle(ca_cert).map_err(CredentialError::InvalidTrustRoots)?;
        if roots.is_empty() {
            return Err(CredentialError::EmptyTrustRoots.into());
        }

        builder = builder.tls_built_in_root_certs(false);
        for root in roots {
            builder = builder.add_root_certificate(root);
        }
    }

    if let Some(proxy) = endpoint.proxy() {
        let proxy = Proxy::all(proxy.clone()).map_err(TransportError::ClientBuild)?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build().map_err(TransportError::ClientBuild)?)
}

#[async_trait]
impl RoleTokenIssuer for ZtsIssuer {
    #[tracing::instrument(
        skip(self, endpoint, credential, request),
        fields(
            zts.url = %endpoint.base_url(),
            domain = %request.domain,
            role = %request.role,
            credential.kind = credential.kind(),
        ),
    )]
    async fn issue_role_token(
        &self,
        endpoint: &Endpoint,
        credential: Credential,
        request: &RoleTokenRequest<'_>,
    ) -> Result<IssuedRoleToken, Error> {
        let client = build_client(endpoint, &credential)?;
        let url = endpoint.join_segments(["domain", request.domain.as_str(), "token"]);

        let mut req = client.get(url).query(&[("role", request.role.as_str())]);
        if let Some(min) = request.min_expiry {
            req = req.query(&[("minExpiryTime", min.0)]);
        }
        if let Some(max) = request.max_expiry {
            req = req.query(&[("maxExpiryTime", max.0)]);
        }
        if let Credential::PrincipalToken { header, value } = credential {
            req = req.header(header, value);
        }

        tracing::trace!("requesting role token from token service");
        let resp = req.send().await.map_err(TransportError::RequestSend)?;

        tracing::debug!(
            response.status = resp.status().as_u16(),
            "received role token response"
        );

        if let Err(source) = resp.error_for_status_ref().map(|_| ()) {
            let status = resp.status().as_u16();
            let body = resp.text().await.map_err(TransportError::BodyRead)?;
            return Err(TransportError::ErrorWithBody {
                status,
                source,
                body,
            }
            .into());
        }

        let body = resp.bytes().await.map_err(TransportError::BodyRead)?;
        let resp: dto::RoleTokenResponse =
            serde_json::from_slice(&body).map_err(TransportError::from)?;

        Ok(IssuedRoleToken {
            token: resp.token,
            expiry: UnixTime::from_secs_lossy(resp.expiry_time),
        })
    }
}
