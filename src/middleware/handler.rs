//! Handler and middleware traits.

use super::request::{Request, Response};
use crate::Result;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Terminal business logic: turns a request into a response.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, req: Request) -> Result<Response>;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn call(&self, req: Request) -> Result<Response> {
        (**self).call(req).await
    }
}

/// Adapts an async closure into a [`Handler`].
pub struct FnHandler<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response>> + Send,
{
    async fn call(&self, req: Request) -> Result<Response> {
        (self.0)(req).await
    }
}

/// One stage wrapped around the rest of a chain.
///
/// A stage either answers on its own (short-circuit) or hands the request on
/// with [`Next::run`] and may decorate whatever comes back.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn process(&self, req: Request, next: Next<'_>) -> Result<Response>;

    fn name(&self) -> &str {
        "unnamed"
    }
}

/// The remainder of a chain: the stages not yet run plus the final handler.
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub(crate) fn new(middlewares: &'a [Arc<dyn Middleware>], handler: &'a dyn Handler) -> Self {
        Self {
            middlewares,
            handler,
        }
    }

    pub async fn run(self, req: Request) -> Result<Response> {
        match self.middlewares.split_first() {
            Some((first, rest)) => first.process(req, Next::new(rest, self.handler)).await,
            None => self.handler.call(req).await,
        }
    }
}
