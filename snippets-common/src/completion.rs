//! One-shot completion signals
//!
//! Store mutations and metric reports return a [`Completion`] that resolves
//! once the underlying work is finished, whether or not that work succeeded.
//! Callers chain follow-up actions (reload after block, navigate after click)
//! by awaiting it.
//!
//! A completion whose sender is dropped without firing still resolves, so a
//! failed or abandoned worker can never strand a continuation.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

/// Resolves once the associated operation has finished
#[must_use = "a Completion does nothing unless awaited"]
#[derive(Debug)]
pub struct Completion {
    // None once fired; a oneshot receiver must not be polled after completion
    rx: Option<oneshot::Receiver<()>>,
}

/// Firing side of a [`Completion`]
#[derive(Debug)]
pub struct CompletionSender {
    tx: oneshot::Sender<()>,
}

impl CompletionSender {
    /// Signal completion. Ignored if the receiving side was dropped.
    pub fn complete(self) {
        let _ = self.tx.send(());
    }
}

impl Completion {
    /// Create a linked sender/completion pair
    pub fn pair() -> (CompletionSender, Completion) {
        let (tx, rx) = oneshot::channel();
        (CompletionSender { tx }, Completion { rx: Some(rx) })
    }

    /// A completion that has already fired
    pub fn ready() -> Self {
        let (tx, rx) = Self::pair();
        tx.complete();
        rx
    }

    /// A completion that fires on a later scheduler turn, never inline
    ///
    /// Gives gated-out work the same asynchronous timing as work that
    /// actually performed I/O. Outside a tokio runtime it degrades to
    /// [`Completion::ready`].
    pub fn next_tick() -> Self {
        let (tx, rx) = Self::pair();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::task::yield_now().await;
                    tx.complete();
                });
            }
            Err(_) => tx.complete(),
        }
        rx
    }

    /// Non-blocking check; `true` once the completion has fired
    pub fn try_complete(&mut self) -> bool {
        let Some(rx) = self.rx.as_mut() else {
            return true;
        };
        match rx.try_recv() {
            Err(oneshot::error::TryRecvError::Empty) => false,
            _ => {
                self.rx = None;
                true
            }
        }
    }

    /// Wait until every completion has fired
    pub async fn all(completions: Vec<Completion>) {
        futures::future::join_all(completions).await;
    }
}

impl Future for Completion {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(());
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(_) => {
                self.rx = None;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
