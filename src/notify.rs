//! Close signals shared between a client and its connection drivers.
//!
//! A [`Sender`] fires by being consumed (or dropped); every [`Receiver`]
//! resolves once all senders cloned from the same channel are gone. The client
//! uses one channel to broadcast shutdown to drivers, and a second one in the
//! opposite direction so it can wait until every driver has exited.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::BoxFuture;

#[derive(Debug, Clone)]
pub(crate) struct Sender(Option<tokio::sync::watch::Receiver<()>>);

impl Sender {
    pub(crate) fn send(&mut self) {
        if self.0.take().is_some() {
            tracing::trace!("sending close signal");
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Receiver(Arc<tokio::sync::watch::Sender<()>>);

impl Receiver {
    /// True once every sender has fired.
    pub(crate) fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

impl IntoFuture for Receiver {
    type IntoFuture = Notified;
    type Output = ();

    fn into_future(self) -> Self::IntoFuture {
        Notified(Box::pin(async move {
            self.0.closed().await;
        }))
    }
}

#[pin_project::pin_project]
pub(crate) struct Notified(#[pin] BoxFuture<'static, ()>);

impl Future for Notified {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().0.poll(cx)
    }
}

pub(crate) fn channel() -> (Sender, Receiver) {
    let (tx, rx) = tokio::sync::watch::channel(());
    (Sender(Some(rx)), Receiver(Arc::new(tx)))
}
