//! Principal token sources backed by memory and by the local filesystem

use std::{io, path::PathBuf};

use async_trait::async_trait;

use super::PrincipalTokenSource;
use crate::{error::BoxError, PrincipalToken};

/// A principal token source that always returns the same token
#[derive(Clone, Debug)]
pub struct StaticPrincipalToken {
    token: PrincipalToken,
}

impl StaticPrincipalToken {
    /// Constructs a source for a fixed token
    pub fn new(token: impl Into<PrincipalToken>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl PrincipalTokenSource for StaticPrincipalToken {
    async fn principal_token(&self) -> Result<PrincipalToken, BoxError> {
        Ok(self.token.clone())
    }
}

/// A principal token source that reads the token from a local file
///
/// The file is read on every request so that tokens rotated by an
/// external agent are picked up. Surrounding whitespace is ignored.
#[derive(Clone, Debug)]
pub struct FilePrincipalToken {
    path: PathBuf,
}

impl FilePrincipalToken {
    /// Constructs a new file principal token source
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_token(&self) -> Result<PrincipalToken, io::Error> {
        let data = tokio::fs::read_to_string(&self.path).await?;
        let token = data.trim();
        if token.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "principal token file is empty",
            ));
        }

        Ok(PrincipalToken::new(token.to_owned()))
    }
}

#[async_trait]
impl PrincipalTokenSource for FilePrincipalToken {
    async fn principal_token(&self) -> Result<PrincipalToken, BoxError> {
        Ok(self.read_token().await?)
    }
}
