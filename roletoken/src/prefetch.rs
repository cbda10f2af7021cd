//! Background refresh of a role token cache

use std::{
    error,
    sync::{Arc, PoisonError, Weak},
    time::Duration,
};

use roletoken_clock::Clock;
use tokio::{
    runtime::Handle,
    sync::oneshot,
    time::{self, MissedTickBehavior},
};

use crate::{
    cache::{Inner, RoleTokenCache},
    error::LifecycleError,
    sources::RoleTokenIssuer,
    Error,
};

/// A running prefetcher
///
/// Dropping the sender, either through an explicit stop or because the
/// cache itself was dropped, ends the background task.
#[derive(Debug)]
pub(crate) struct PrefetchTask {
    cancel: oneshot::Sender<()>,
}

impl<I, C> RoleTokenCache<I, C>
where
    I: RoleTokenIssuer + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Starts refreshing the token in the background
    ///
    /// The token is refreshed every
    /// [`prefetch_interval`](crate::RoleTokenOptions::prefetch_interval), the
    /// first refresh happening one interval after the prefetcher starts.
    /// Failed refreshes are logged and retried on the next tick.
    ///
    /// Must be called from within a tokio runtime. Fails if the prefetcher
    /// is already running.
    pub fn start_prefetcher(&self) -> Result<(), Error> {
        let mut state = self
            .inner
            .prefetcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if state.is_some() {
            return Err(LifecycleError::AlreadyRunning.into());
        }

        let runtime = Handle::try_current().map_err(|_| LifecycleError::NoRuntime)?;
        let period = self.inner.options.prefetch_interval();
        let (cancel, cancelled) = oneshot::channel();

        runtime.spawn(forever_prefetch(
            Arc::downgrade(&self.inner),
            period,
            cancelled,
        ));
        *state = Some(PrefetchTask { cancel });

        tracing::info!(
            domain = %self.domain(),
            role = %self.role(),
            period_secs = period.as_secs(),
            "role token prefetcher started"
        );
        Ok(())
    }

    /// Stops refreshing the token in the background
    ///
    /// A refresh already in progress is allowed to finish; no further
    /// refreshes are scheduled. Fails if the prefetcher is not running.
    pub fn stop_prefetcher(&self) -> Result<(), Error> {
        let task = self
            .inner
            .prefetcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(LifecycleError::AlreadyStopped)?;

        // The task may already be gone if the runtime shut down.
        let _ = task.cancel.send(());

        tracing::info!(
            domain = %self.domain(),
            role = %self.role(),
            "role token prefetcher stopped"
        );
        Ok(())
    }
}

async fn forever_prefetch<I, C>(
    inner: Weak<Inner<I, C>>,
    period: Duration,
    mut cancelled: oneshot::Receiver<()>,
) where
    I: RoleTokenIssuer,
    C: Clock + Send + Sync,
{
    let mut timer = time::interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = &mut cancelled => {
                tracing::debug!("prefetcher cancelled");
                return;
            }
            _ = timer.tick() => {}
        }

        let Some(inner) = inner.upgrade() else {
            tracing::debug!("role token cache dropped, halting prefetcher");
            return;
        };

        tracing::debug!("prefetching role token");
        if let Err(error) = inner.refresh().await {
            tracing::warn!(
                error = (&error as &dyn error::Error),
                "error prefetching role token, will retry on next tick"
            );
        }
    }
}
