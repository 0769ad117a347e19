//! Middleware chain for the proxy's request path.
//!
//! Requests and responses travel through the chain fully buffered, so every
//! layer can look at a body without consuming it.

use apitap_core::{BufferedRequest, BufferedResponse};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by every stage of the chain.
pub type BoxFuture = Pin<Box<dyn Future<Output = BufferedResponse> + Send + 'static>>;

/// The rest of the chain, as seen from a layer.
pub type BoxedNext = Arc<dyn Fn(BufferedRequest) -> BoxFuture + Send + Sync>;

/// A stage of the proxy pipeline.
pub trait MiddlewareLayer: Send + Sync + 'static {
    /// Handle `req`, calling `next` to continue the chain
    fn call(&self, req: BufferedRequest, next: BoxedNext) -> BoxFuture;

    /// Clone this middleware into a boxed trait object
    fn clone_box(&self) -> Box<dyn MiddlewareLayer>;
}

impl Clone for Box<dyn MiddlewareLayer> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// A stack of middleware layers
#[derive(Clone, Default)]
pub struct LayerStack {
    layers: Vec<Box<dyn MiddlewareLayer>>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Add a layer. Layers run in the order they are added (outermost first).
    pub fn push(&mut self, layer: Box<dyn MiddlewareLayer>) {
        self.layers.push(layer);
    }

    /// Builder form of [`push`](Self::push).
    pub fn layer<L: MiddlewareLayer>(mut self, layer: L) -> Self {
        self.push(Box::new(layer));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Run `req` through every layer and finally `handler`.
    pub fn execute(&self, req: BufferedRequest, handler: BoxedNext) -> BoxFuture {
        if self.layers.is_empty() {
            return handler(req);
        }

        // Build the chain from inside out
        let mut next = handler;

        for layer in self.layers.iter().rev() {
            let layer = layer.clone_box();
            let current_next = next;
            next = Arc::new(move |req: BufferedRequest| {
                let layer = layer.clone_box();
                let next = current_next.clone();
                Box::pin(async move { layer.call(req, next).await }) as BoxFuture
            });
        }

        next(req)
    }
}

/// Wrap an async closure as the innermost handler of a chain.
pub fn handler_fn<F, Fut>(f: F) -> BoxedNext
where
    F: Fn(BufferedRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BufferedResponse> + Send + 'static,
{
    Arc::new(move |req: BufferedRequest| Box::pin(f(req)) as BoxFuture)
}
