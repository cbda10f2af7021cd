use std::{path::PathBuf, time::Duration};

use clap::Parser;
use color_eyre::eyre::{bail, WrapErr};
use roletoken::{sources, CredentialMode, RoleTokenCache, RoleTokenOptions, TokenStatus};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The token service base URL, e.g. `https://zts.example.com:4443/zts/v1`
    #[arg(short, long, env = "ZTS_URL")]
    base_url: String,

    /// The domain to request a role token for
    #[arg(short, long, env = "ZTS_DOMAIN")]
    domain: String,

    /// The role to request a role token for
    #[arg(short, long, env = "ZTS_ROLE")]
    role: String,

    /// A file containing the principal token used to authenticate
    #[arg(long, env, conflicts_with_all = ["cert_file", "key_file"])]
    ntoken_file: Option<PathBuf>,

    /// The client certificate used to authenticate
    #[arg(long, env, requires = "key_file")]
    cert_file: Option<PathBuf>,

    /// The private key for the client certificate
    #[arg(long, env, requires = "cert_file")]
    key_file: Option<PathBuf>,

    /// A PEM bundle of certificate authorities to trust instead of the system roots
    #[arg(long, env)]
    ca_file: Option<PathBuf>,

    /// A proxy to send token requests through
    #[arg(long, env)]
    proxy_url: Option<String>,

    /// The minimum lifetime to request for a token, in seconds
    #[arg(long, env, default_value_t = 0)]
    min_expire_secs: u64,

    /// The maximum lifetime to request for a token, in seconds
    #[arg(long, env, default_value_t = 0)]
    max_expire_secs: u64,

    /// How often the background prefetcher refreshes the token, in seconds
    #[arg(long, env, default_value_t = 600)]
    prefetch_secs: u64,

    /// How often to pull the token from the cache, in seconds
    #[arg(long, env, default_value_t = 5)]
    poll_secs: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let credentials = match (opts.ntoken_file, opts.cert_file, opts.key_file) {
        (Some(ntoken_file), None, None) => {
            CredentialMode::principal_token(sources::FilePrincipalToken::new(ntoken_file))
        }
        (None, Some(cert_file), Some(key_file)) => {
            CredentialMode::client_certificate(cert_file, key_file)
        }
        _ => bail!("either --ntoken-file or both --cert-file and --key-file must be provided"),
    };

    let mut options = RoleTokenOptions::default()
        .with_base_url(opts.base_url)
        .with_min_expire(Duration::from_secs(opts.min_expire_secs))
        .with_max_expire(Duration::from_secs(opts.max_expire_secs))
        .with_prefetch_interval(Duration::from_secs(opts.prefetch_secs));

    if let Some(proxy_url) = opts.proxy_url {
        options = options.with_proxy_url(proxy_url);
    }

    if let Some(ca_file) = opts.ca_file {
        let pem = tokio::fs::read(&ca_file)
            .await
            .wrap_err_with(|| format!("reading CA bundle {}", ca_file.display()))?;
        options = options.with_ca_cert(pem);
    }

    let cache = RoleTokenCache::new(opts.domain, opts.role, credentials, options);

    let token = cache.role_token().await?;
    tracing::info!(token = format_args!("{:#?}", token), "first role token");

    cache.start_prefetcher()?;

    let mut interval = time::interval(Duration::from_secs(opts.poll_secs.max(1)));
    loop {
        interval.tick().await;

        if let Err(error) = cache.role_token().await {
            tracing::error!(
                error = (&error as &dyn std::error::Error),
                "unable to obtain role token"
            );
            continue;
        }

        let Some(token) = cache.cached().await else {
            continue;
        };

        let status = token.token_status();
        match status {
            TokenStatus::Fresh => {
                tracing::debug!(
                    ?status,
                    stale = token.stale().0,
                    expiry = token.expiry().0,
                    "pulled token"
                )
            }
            TokenStatus::Stale => {
                tracing::warn!(
                    ?status,
                    stale = token.stale().0,
                    expiry = token.expiry().0,
                    "pulled token"
                )
            }
            TokenStatus::Expired => {
                tracing::error!(
                    ?status,
                    stale = token.stale().0,
                    expiry = token.expiry().0,
                    "pulled token"
                )
            }
        }
    }
}
