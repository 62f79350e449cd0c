//! Start/done handshake between a controller and the unit it drives.
//!
//! A controller raises `start` by spawning the unit's work on the current executor and gets back
//! a [`Done`] that resolves on the cycle the unit signals completion.

use core::pin::Pin;
use std::future::Future;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::Executor;

/// The started unit went away without signalling done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unit was dropped before signalling done")]
pub struct Aborted;

/// Completion signal of a started unit.
pub struct Done<T>(oneshot::Receiver<T>);

impl<T> Future for Done<T> {
    type Output = Result<T, Aborted>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map_err(|_| Aborted)
    }
}

/// Start `task` on the current executor.
pub fn start<T: Send + 'static>(task: impl Future<Output = T> + Send + 'static) -> Done<T> {
    let (tx, rx) = oneshot::channel();
    Executor::current().spawn(async move {
        // The receiver may have been dropped; the unit still runs to completion.
        let _ = tx.send(task.await);
    });
    Done(rx)
}
