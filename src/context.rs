//! Caller-supplied cancellation and deadline for API calls.

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation signal and deadline that bound every network wait of a call.
///
/// A cancelled call fails with [`Error::Cancelled`], an expired one with
/// [`Error::Timeout`]. Neither is ever retried by the client.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// use wikisession::{CallContext, Client, Params};
///
/// # async fn example() -> Result<(), wikisession::Error> {
/// let client = Client::new("https://wiki.example.org/w/api.php")?;
///
/// let shutdown = CancellationToken::new();
/// let ctx = CallContext::background()
///     .with_timeout(Duration::from_secs(10))
///     .with_cancellation(shutdown.child_token());
///
/// client.get(&ctx, Params::new().set("meta", "siteinfo")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Sets a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Sets an absolute deadline. An earlier deadline already set is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Attaches a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The deadline, if one is set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the error this context would fail with right now, if any.
    pub fn check(&self) -> Result<()> {
        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(Error::Cancelled);
        }
        if self.deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(Error::Timeout);
        }
        Ok(())
    }

    /// Runs `fut` until it finishes, the token is cancelled or the deadline
    /// passes, whichever comes first. `fut` is dropped on cancellation.
    pub(crate) async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;

        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            result = fut => result,
            _ = cancelled => Err(Error::Cancelled),
            _ = expired => Err(Error::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_runs_to_completion() {
        let ctx = CallContext::background();
        assert_eq!(ctx.run(async { Ok(7) }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn cancelled_token_aborts() {
        let token = CancellationToken::new();
        let ctx = CallContext::background().with_cancellation(token.clone());

        let handle = tokio::spawn({
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel();
            }
        });

        let result: Result<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        handle.await.unwrap();

        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn expired_deadline_times_out() {
        let ctx = CallContext::background().with_timeout(Duration::from_millis(20));
        let result: Result<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[test]
    fn earlier_deadline_wins() {
        let soon = Instant::now() + Duration::from_secs(1);
        let ctx = CallContext::background()
            .with_deadline(soon)
            .with_timeout(Duration::from_secs(60));
        assert_eq!(ctx.deadline(), Some(soon));
    }

    #[test]
    fn check_reports_cancellation_first() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = CallContext::background()
            .with_cancellation(token)
            .with_deadline(Instant::now());
        assert!(matches!(ctx.check(), Err(Error::Cancelled)));
    }
}
