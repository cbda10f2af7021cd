//! Credentials presented to the token service

use std::{fmt, path::PathBuf, sync::Arc};

use reqwest::header::{HeaderName, HeaderValue};

use crate::{error::CredentialError, sources::PrincipalTokenSource};

/// How a role token cache authenticates to the token service
///
/// The mode is fixed for the lifetime of the cache.
#[derive(Clone)]
pub enum CredentialMode {
    /// Present a principal token obtained from a source in a request header
    PrincipalToken(Arc<dyn PrincipalTokenSource>),
    /// Authenticate with a TLS client certificate
    ///
    /// Both files are read on every refresh, so rotated certificates are
    /// picked up without reconstructing the cache.
    ClientCertificate {
        /// Path to the PEM-encoded certificate
        cert_file: PathBuf,
        /// Path to the PEM-encoded private key
        key_file: PathBuf,
    },
}

impl CredentialMode {
    /// Authenticate using tokens from the given principal token source
    pub fn principal_token(source: impl PrincipalTokenSource + 'static) -> Self {
        Self::PrincipalToken(Arc::new(source))
    }

    /// Authenticate using the certificate and key stored in the given files
    pub fn client_certificate(cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        Self::ClientCertificate {
            cert_file: cert_file.into(),
            key_file: key_file.into(),
        }
    }

    pub(crate) async fn resolve(
        &self,
        principal_auth_header: &HeaderName,
    ) -> Result<Credential, CredentialError> {
        match self {
            Self::PrincipalToken(source) => {
                let token = source
                    .principal_token()
                    .await
                    .map_err(CredentialError::PrincipalTokenUnavailable)?;
                let mut value = HeaderValue::from_str(token.as_str())
                    .map_err(CredentialError::InvalidPrincipalToken)?;
                value.set_sensitive(true);

                Ok(Credential::PrincipalToken {
                    header: principal_auth_header.clone(),
                    value,
                })
            }
            Self::ClientCertificate {
                cert_file,
                key_file,
            } => {
                let certificate_pem = tokio::fs::read(cert_file).await.map_err(|source| {
                    CredentialError::ReadCertificate {
                        path: cert_file.clone(),
                        source,
                    }
                })?;
                let key_pem =
                    tokio::fs::read(key_file)
                        .await
                        .map_err(|source| CredentialError::ReadKey {
                            path: key_file.clone(),
                            source,
                        })?;

                Ok(Credential::ClientIdentity {
                    certificate_pem,
                    key_pem,
                })
            }
        }
    }
}

impl fmt::Debug for CredentialMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::PrincipalToken(_) => f.debug_tuple("PrincipalToken").field(&"..").finish(),
            Self::ClientCertificate {
                cert_file,
                key_file,
            } => f
                .debug_struct("ClientCertificate")
                .field("cert_file", cert_file)
                .field("key_file", key_file)
                .finish(),
        }
    }
}

/// A credential resolved for a single request to the token service
pub enum Credential {
    /// A principal token to send in the named header
    PrincipalToken {
        /// The header to send the token in
        header: HeaderName,
        /// The token, marked sensitive
        value: HeaderValue,
    },
    /// A PEM-encoded TLS client identity
    ClientIdentity {
        /// The certificate chain
        certificate_pem: Vec<u8>,
        /// The private key
        key_pem: Vec<u8>,
    },
}

impl Credential {
    /// A short name for the kind of credential, suitable for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PrincipalToken { .. } => "principal_token",
            Self::ClientIdentity { .. } => "client_certificate",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::PrincipalToken { header, value } => f
                .debug_struct("PrincipalToken")
                .field("header", header)
                .field("value", value)
                .finish(),
            Self::ClientIdentity {
                certificate_pem, ..
            } => f
                .debug_struct("ClientIdentity")
                .field("certificate_pem_len", &certificate_pem.len())
                .finish_non_exhaustive(),
        }
    }
}
