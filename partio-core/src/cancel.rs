//! Cancellation signal threaded through every upload workflow.
//!
//! A `Cancellation` fires either when its `CancelHandle` is triggered or when
//! its deadline passes. In-flight I/O raced through [`Cancellation::guard`]
//! aborts with [`PartioError::Cancelled`]; whatever state already reached the
//! stores is left for the cleanup path.

use crate::error::{PartioError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    signal: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

impl Cancellation {
    /// A signal that never fires
    pub fn never() -> Self {
        Self::default()
    }

    pub fn new() -> (CancelHandle, Self) {
        let (sender, receiver) = watch::channel(false);
        (
            CancelHandle { sender },
            Self {
                signal: Some(receiver),
                deadline: None,
            },
        )
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        let signalled = self
            .signal
            .as_ref()
            .map(|signal| *signal.borrow())
            .unwrap_or(false);
        let expired = self
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline);
        signalled || expired
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(PartioError::Cancelled);
        }
        Ok(())
    }

    /// Run `future` unless the signal fires first.
    pub async fn guard<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;

        let mut signal = self.signal.clone();
        tokio::select! {
            biased;
            output = future => output,
            _ = wait_signalled(&mut signal) => Err(PartioError::Cancelled),
            _ = wait_deadline(self.deadline) => Err(PartioError::Cancelled),
        }
    }
}

async fn wait_signalled(signal: &mut Option<watch::Receiver<bool>>) {
    match signal {
        Some(receiver) => {
            if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
                // Handle dropped without cancelling.
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
