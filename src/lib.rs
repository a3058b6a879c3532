//! Hyperpage
//!
//! A small HTTP/1.1 client built on hyper and tokio, and a paged remote image
//! fetch pipeline built on top of it.
//!
//! The client is organised in layers:
//!
//! 1. [`client::Client`] owns a [transport][client::transport::Transport] and
//!    opens [`Connection`][client::conn::Connection]s to an
//!    [`Endpoint`][client::Endpoint]. Each connection is served by a driver task
//!    implementing one of three strategies: one-shot, persistent, or pipelined.
//! 2. A connection accepts a [`PendingRequest`][client::PendingRequest] and a
//!    callback, and invokes the callback exactly once with the outcome.
//! 3. [`client::service::call`] bridges that callback into a single `.await`.
//!
//! On top of that, [`loader`] binds entities to lazily fetched images sharing a
//! connection chosen by [`prefix::infer_base`], and [`paging`] fetches search
//! results a page at a time while downloading every item's thumbnail
//! concurrently.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use std::fmt;
use std::future::Future;
use std::pin::Pin;

pub mod bridge;
pub mod client;
pub use client::Client;
pub mod image;
pub mod loader;
mod notify;
pub mod paging;
pub mod prefix;

/// Boxed error type used at the edges of the transport layer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) struct DebugLiteral<T: fmt::Display>(T);

impl<T: fmt::Display> fmt::Debug for DebugLiteral<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
