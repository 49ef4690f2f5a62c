// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The service collaborator trait (spec §6 "Service handler contract",
//! component M). A registered service turns opaque request bytes into
//! opaque response bytes for one or more method names; the channel manager
//! owns framing, dispatch and timeouts around it.
//!
//! No `async-trait` macro is used here: the trait returns a boxed future
//! directly, the same dyn-compatible shape the teacher's `StateMachine`
//! trait uses for its `step` method.

use std::{future::Future, pin::Pin};

use anyhow::Result;

pub type CallFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;

/// A handler for one RPC service. `method` is the unqualified method name
/// (spec §4.G "service-name extraction"); `args` and the returned bytes are
/// whatever the caller's structured serialisation layer produced/expects.
pub trait Service: Send + Sync {
    fn call<'a>(&'a self, method: &'a str, args: &'a [u8]) -> CallFuture<'a>;
}

/// Adapts a plain async closure into a [`Service`] without requiring a new
/// type per handler — useful for tests and small demos that register one
/// function per service rather than a struct.
pub struct FnService<F> {
    handler: F,
}

impl<F> FnService<F> {
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F, Fut> Service for FnService<F>
where
    F: Fn(String, Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
{
    fn call<'a>(&'a self, method: &'a str, args: &'a [u8]) -> CallFuture<'a> {
        let fut = (self.handler)(method.to_string(), args.to_vec());
        Box::pin(fut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fn_service_dispatches_by_method_name() {
        let svc = FnService::new(|method: String, args: Vec<u8>| async move {
            match method.as_str() {
                "echo" => Ok(args),
                other => Err(anyhow::anyhow!("unknown method {other}")),
            }
        });
        let out = svc.call("echo", b"hi").await.expect("call");
        assert_eq!(out, b"hi");
        assert!(svc.call("nope", b"").await.is_err());
    }
}
