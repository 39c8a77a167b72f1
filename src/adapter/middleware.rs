//! The middleware pipeline: an ordered, short-circuiting chain around turn
//! processing.
//!
//! Middleware wraps the rest of the turn: it can run code before and after
//! awaiting `next`, replace or enrich what the application callback sees, or
//! short-circuit the chain entirely by never calling `next`. Short-circuiting
//! is silent by design; no error is raised for downstream stages that never
//! ran.

use crate::turn::{TurnContext, TurnError};
use async_trait::async_trait;
use std::sync::Arc;

/// The terminal application callback at the end of the middleware chain.
#[async_trait]
pub trait TurnHandler: Send + Sync {
    async fn on_turn(&self, ctx: &TurnContext) -> Result<(), TurnError>;
}

/// A pipeline stage wrapping turn processing.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Processes the turn, calling `next.run(ctx)` to hand control to the
    /// rest of the chain. Calling `next` more than once is undefined; not
    /// calling it short-circuits all later middleware and the callback.
    async fn on_turn(&self, ctx: &TurnContext, next: Next<'_>) -> Result<(), TurnError>;
}

/// Continuation over the remaining middleware, bottoming out in the terminal
/// callback (when one is present).
pub struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    callback: Option<&'a dyn TurnHandler>,
}

impl Next<'_> {
    /// Invokes the rest of the chain.
    pub async fn run(self, ctx: &TurnContext) -> Result<(), TurnError> {
        match self.middleware.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    middleware: rest,
                    callback: self.callback,
                };
                head.on_turn(ctx, next).await
            }
            None => match self.callback {
                Some(callback) => callback.on_turn(ctx).await,
                None => Ok(()),
            },
        }
    }
}

/// An ordered, append-only collection of middleware.
#[derive(Default)]
pub struct MiddlewareSet {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware to the end of the chain. There is no removal.
    pub fn use_middleware(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Runs the chain against `ctx`, invoking `callback` when the last
    /// middleware calls through.
    ///
    /// Any error raised by a middleware or the callback propagates to the
    /// caller unchanged; nothing here retries.
    pub async fn run(
        &self,
        ctx: &TurnContext,
        callback: Option<&dyn TurnHandler>,
    ) -> Result<(), TurnError> {
        let next = Next {
            middleware: &self.middleware,
            callback,
        };
        next.run(ctx).await
    }
}

/// A middleware set can itself be registered as a single middleware inside
/// another chain: it runs its own chain to completion (with no terminal
/// callback), then hands control to the outer chain.
#[async_trait]
impl Middleware for MiddlewareSet {
    async fn on_turn(&self, ctx: &TurnContext, next: Next<'_>) -> Result<(), TurnError> {
        self.run(ctx, None).await?;
        next.run(ctx).await
    }
}
