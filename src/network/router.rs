//! Event Router
//!
//! A tree of named handlers. Inner nodes are sub-routers keyed by path
//! segment, leaves are procedures: an ordered middleware chain wrapped around
//! a terminal handler.
//!
//! ```text
//! router
//! ├── chat
//! │   └── say        [rate_limit, require_user] -> handler
//! └── character
//!     ├── move       [require_user] -> handler
//!     └── attack     [require_user] -> handler
//! ```
//!
//! Inputs and outputs cross the tree as bincode bytes; each leaf decodes its
//! own input type, so one tree can hold handlers of unrelated signatures.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Failure inside a procedure (middleware or terminal handler).
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Payload bytes did not decode into the handler's input type.
    #[error("invalid input: {0}")]
    InvalidInput(#[source] bincode::Error),

    /// Handler output could not be encoded.
    #[error("failed to encode output: {0}")]
    Output(#[source] bincode::Error),

    /// Middleware or handler returned an error.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Result of running a procedure: encoded output bytes.
pub type HandlerResult = Result<Vec<u8>, HandlerError>;

/// Dispatch errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// No procedure lives at the path.
    #[error("route not found: \"{path}\"")]
    RouteNotFound {
        /// Dotted path that failed to resolve.
        path: String,
    },

    /// The procedure ran and failed.
    #[error("error in event handler \"{path}\": {source}")]
    Handler {
        /// Dotted path of the failing procedure.
        path: String,
        /// What went wrong.
        #[source]
        source: HandlerError,
    },
}

impl RouterError {
    /// Dotted path the error refers to.
    pub fn path(&self) -> &str {
        match self {
            RouterError::RouteNotFound { path } | RouterError::Handler { path, .. } => path,
        }
    }
}

type Leaf<C> = Arc<dyn Fn(C, Vec<u8>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A middleware: receives the context and the rest of the chain.
///
/// Calling `next.run(ctx)` continues inward; returning without calling it
/// short-circuits. The context is owned, so a middleware can hand an
/// augmented copy inward without affecting its caller.
pub type Middleware<C> = Arc<dyn Fn(C, Next<C>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Box an async closure into a [`Middleware`].
pub fn middleware<C, F, Fut>(f: F) -> Middleware<C>
where
    F: Fn(C, Next<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |ctx, next| f(ctx, next).boxed())
}

/// The remainder of a middleware chain, ending in the terminal handler.
pub struct Next<C> {
    chain: Arc<[Middleware<C>]>,
    index: usize,
    leaf: Leaf<C>,
    input: Vec<u8>,
}

impl<C> Next<C> {
    /// Run the rest of the chain with the given context.
    pub fn run(self, ctx: C) -> BoxFuture<'static, HandlerResult> {
        match self.chain.get(self.index).cloned() {
            Some(mw) => {
                let next = Next {
                    index: self.index + 1,
                    ..self
                };
                mw(ctx, next)
            }
            None => (self.leaf)(ctx, self.input),
        }
    }
}

/// A leaf: middleware chain plus terminal handler.
pub struct HandlerNode<C> {
    middleware: Arc<[Middleware<C>]>,
    leaf: Leaf<C>,
}

impl<C> HandlerNode<C> {
    /// Run the middleware chain and handler.
    pub fn call(&self, ctx: C, input: Vec<u8>) -> BoxFuture<'static, HandlerResult> {
        Next {
            chain: self.middleware.clone(),
            index: 0,
            leaf: self.leaf.clone(),
            input,
        }
        .run(ctx)
    }

    /// Number of middleware in front of the handler.
    pub fn middleware_count(&self) -> usize {
        self.middleware.len()
    }
}

/// Router tree node.
pub enum RouterNode<C> {
    /// Sub-router keyed by path segment.
    Router(BTreeMap<String, RouterNode<C>>),
    /// Procedure.
    Handler(HandlerNode<C>),
}

impl<C> fmt::Debug for RouterNode<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterNode::Router(routes) => f.debug_map().entries(routes.iter()).finish(),
            RouterNode::Handler(node) => write!(f, "Handler(middleware: {})", node.middleware_count()),
        }
    }
}

/// Build a sub-router from `(segment, node)` pairs.
///
/// Segments are unique per level; a repeated segment replaces the earlier
/// entry.
pub fn router<C, K>(routes: impl IntoIterator<Item = (K, RouterNode<C>)>) -> RouterNode<C>
where
    K: Into<String>,
{
    RouterNode::Router(routes.into_iter().map(|(k, v)| (k.into(), v)).collect())
}

/// Start building a procedure.
pub fn procedure<C>() -> Procedure<C, ()> {
    Procedure {
        middleware: Vec::new(),
        _input: PhantomData,
    }
}

/// Procedure builder: `procedure().middleware(m).input::<I>().handler(f)`.
pub struct Procedure<C, I> {
    middleware: Vec<Middleware<C>>,
    _input: PhantomData<fn() -> I>,
}

impl<C, I> Procedure<C, I> {
    /// Append a middleware; earlier middleware wrap later ones.
    pub fn middleware(mut self, mw: Middleware<C>) -> Self {
        self.middleware.push(mw);
        self
    }

    /// Set the input type decoded from the payload.
    pub fn input<J>(self) -> Procedure<C, J> {
        Procedure {
            middleware: self.middleware,
            _input: PhantomData,
        }
    }

    /// Finish the procedure with its terminal handler.
    pub fn handler<F, Fut, O>(self, f: F) -> RouterNode<C>
    where
        C: Send + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize,
        F: Fn(C, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        let f = Arc::new(f);
        let leaf: Leaf<C> = Arc::new(move |ctx: C, bytes: Vec<u8>| {
            let f = f.clone();
            async move {
                let input: I = bincode::deserialize(&bytes).map_err(HandlerError::InvalidInput)?;
                let output = f(ctx, input).await?;
                bincode::serialize(&output).map_err(HandlerError::Output)
            }
            .boxed()
        });

        RouterNode::Handler(HandlerNode {
            middleware: self.middleware.into(),
            leaf,
        })
    }
}

impl<C> RouterNode<C> {
    /// Find the procedure at `path`.
    ///
    /// A path that stops on a sub-router, or continues past a procedure, does
    /// not resolve.
    pub fn resolve<S: AsRef<str>>(&self, path: &[S]) -> Option<&HandlerNode<C>> {
        match (self, path.split_first()) {
            (RouterNode::Handler(node), None) => Some(node),
            (RouterNode::Router(routes), Some((head, rest))) => routes.get(head.as_ref())?.resolve(rest),
            _ => None,
        }
    }

    /// Whether a message for `path` would reach a procedure.
    pub fn accepts<S: AsRef<str>>(&self, path: &[S]) -> bool {
        self.resolve(path).is_some()
    }

    /// Dispatch an encoded input to the procedure at `path`.
    pub async fn dispatch<S: AsRef<str>>(
        &self,
        path: &[S],
        ctx: C,
        input: Vec<u8>,
    ) -> Result<Vec<u8>, RouterError> {
        let node = self.resolve(path).ok_or_else(|| RouterError::RouteNotFound {
            path: join_path(path),
        })?;

        node.call(ctx, input).await.map_err(|source| RouterError::Handler {
            path: join_path(path),
            source,
        })
    }

    /// Every procedure path in the tree, in key order.
    pub fn handler_paths(&self) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        self.collect_paths(&mut Vec::new(), &mut out);
        out
    }

    fn collect_paths(&self, prefix: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
        match self {
            RouterNode::Handler(_) => out.push(prefix.clone()),
            RouterNode::Router(routes) => {
                for (key, node) in routes {
                    prefix.push(key.clone());
                    node.collect_paths(prefix, out);
                    prefix.pop();
                }
            }
        }
    }
}

/// Render a path as `a.b.c` for logs and errors.
pub fn join_path<S: AsRef<str>>(path: &[S]) -> String {
    path.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(".")
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct Ctx {
        user: Option<String>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Ctx {
        fn push(&self, entry: &str) {
            self.log.lock().push(entry.to_string());
        }

        fn entries(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    fn recording_leaf(name: &'static str) -> RouterNode<Ctx> {
        procedure().handler(move |ctx: Ctx, _: ()| async move {
            ctx.push(name);
            Ok(())
        })
    }

    fn tracing_middleware(name: &'static str) -> Middleware<Ctx> {
        middleware(move |ctx: Ctx, next: Next<Ctx>| async move {
            ctx.push(&format!("{name}-before"));
            let result = next.run(ctx.clone()).await;
            ctx.push(&format!("{name}-after"));
            result
        })
    }

    #[tokio::test]
    async fn test_nested_dispatch() {
        let root = router([("a", router([("b", recording_leaf("leaf"))]))]);
        let ctx = Ctx::default();

        root.dispatch(&["a", "b"], ctx.clone(), vec![]).await.unwrap();
        assert_eq!(ctx.entries(), vec!["leaf"]);
    }

    #[tokio::test]
    async fn test_route_not_found() {
        let root = router([("a", router([("b", recording_leaf("leaf"))]))]);
        let ctx = Ctx::default();

        for path in [vec!["a", "c"], vec!["x"], vec!["a"], vec!["a", "b", "c"], vec![]] {
            let err = root.dispatch(&path, ctx.clone(), vec![]).await.unwrap_err();
            assert!(matches!(err, RouterError::RouteNotFound { .. }), "{path:?}");
            assert_eq!(err.path(), join_path(&path));
        }
        assert!(ctx.entries().is_empty());
    }

    #[tokio::test]
    async fn test_bare_procedure_is_root() {
        let leaf = recording_leaf("root");
        let ctx = Ctx::default();
        let empty: [&str; 0] = [];
        leaf.dispatch(&empty, ctx.clone(), vec![]).await.unwrap();
        assert_eq!(ctx.entries(), vec!["root"]);
    }

    #[tokio::test]
    async fn test_middleware_onion_order() {
        let leaf = procedure()
            .middleware(tracing_middleware("m1"))
            .middleware(tracing_middleware("m2"))
            .handler(|ctx: Ctx, _: ()| async move {
                ctx.push("handler");
                Ok(())
            });
        let root = router([("leaf", leaf)]);
        let ctx = Ctx::default();

        root.dispatch(&["leaf"], ctx.clone(), vec![]).await.unwrap();
        assert_eq!(
            ctx.entries(),
            vec!["m1-before", "m2-before", "handler", "m2-after", "m1-after"]
        );
    }

    #[tokio::test]
    async fn test_middleware_short_circuit() {
        let deny = middleware(|ctx: Ctx, _next: Next<Ctx>| async move {
            ctx.push("deny");
            Err(HandlerError::from(anyhow::anyhow!("forbidden")))
        });
        let root = router([(
            "secret",
            procedure()
                .middleware(tracing_middleware("outer"))
                .middleware(deny)
                .handler(|ctx: Ctx, _: ()| async move {
                    ctx.push("handler");
                    Ok(())
                }),
        )]);
        let ctx = Ctx::default();

        let err = root.dispatch(&["secret"], ctx.clone(), vec![]).await.unwrap_err();
        assert!(matches!(err, RouterError::Handler { source: HandlerError::Failed(_), .. }));
        assert!(err.to_string().contains("forbidden"));
        assert_eq!(ctx.entries(), vec!["outer-before", "deny", "outer-after"]);
    }

    #[tokio::test]
    async fn test_middleware_augments_context_for_inner_calls_only() {
        let login = middleware(|ctx: Ctx, next: Next<Ctx>| async move {
            let inner = Ctx {
                user: Some("alice".to_string()),
                ..ctx.clone()
            };
            let result = next.run(inner).await;
            ctx.push(&format!("outer sees {:?}", ctx.user));
            result
        });
        let root = router([(
            "whoami",
            procedure()
                .middleware(login)
                .handler(|ctx: Ctx, _: ()| async move { Ok(ctx.user) }),
        )]);
        let ctx = Ctx::default();

        let output = root.dispatch(&["whoami"], ctx.clone(), vec![]).await.unwrap();
        let user: Option<String> = bincode::deserialize(&output).unwrap();
        assert_eq!(user.as_deref(), Some("alice"));
        assert_eq!(ctx.entries(), vec!["outer sees None"]);
        assert!(ctx.user.is_none());
    }

    #[tokio::test]
    async fn test_typed_input_and_output() {
        let root = router([(
            "double",
            procedure()
                .input::<u32>()
                .handler(|_ctx: Ctx, n: u32| async move { Ok(n * 2) }),
        )]);

        let input = bincode::serialize(&21u32).unwrap();
        let output = root.dispatch(&["double"], Ctx::default(), input).await.unwrap();
        assert_eq!(bincode::deserialize::<u32>(&output).unwrap(), 42);
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let root = router([(
            "double",
            procedure()
                .input::<u32>()
                .handler(|_ctx: Ctx, n: u32| async move { Ok(n * 2) }),
        )]);

        let err = root.dispatch(&["double"], Ctx::default(), vec![1]).await.unwrap_err();
        assert!(matches!(
            err,
            RouterError::Handler { source: HandlerError::InvalidInput(_), .. }
        ));
    }

    #[tokio::test]
    async fn test_handler_error_is_captured() {
        let root = router([(
            "broken",
            procedure().handler(|_ctx: Ctx, _: ()| async move {
                Err::<(), _>(anyhow::anyhow!("unexpected"))
            }),
        )]);

        let err = root.dispatch(&["broken"], Ctx::default(), vec![]).await.unwrap_err();
        assert_eq!(err.path(), "broken");
        assert!(err.to_string().contains("unexpected"));
    }

    #[test]
    fn test_handler_paths_and_accepts() {
        let root: RouterNode<Ctx> = router([
            ("chat", router([("say", recording_leaf("say"))])),
            (
                "character",
                router([("move", recording_leaf("move")), ("attack", recording_leaf("attack"))]),
            ),
        ]);

        assert_eq!(
            root.handler_paths(),
            vec![
                vec!["character".to_string(), "attack".to_string()],
                vec!["character".to_string(), "move".to_string()],
                vec!["chat".to_string(), "say".to_string()],
            ]
        );
        assert!(root.accepts(&["chat", "say"]));
        assert!(!root.accepts(&["chat"]));
    }
}
