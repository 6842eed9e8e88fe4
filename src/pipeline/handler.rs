use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::context::ExecutionContext;

/// Host code invoked by callback steps.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn call(&self, ctx: &ExecutionContext) -> anyhow::Result<Value>;
}

/// Adapts a synchronous closure into a [`StepHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> StepHandler for FnHandler<F>
where
    F: Fn(&ExecutionContext) -> anyhow::Result<Value> + Send + Sync,
{
    async fn call(&self, ctx: &ExecutionContext) -> anyhow::Result<Value> {
        (self.0)(ctx)
    }
}

/// Named callback handlers available to a pipeline engine.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: impl StepHandler + 'static) {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&ExecutionContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register(name, FnHandler(f));
    }

    pub fn with_fn<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ExecutionContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register_fn(name, f);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registered_closures_are_callable() {
        let registry = HandlerRegistry::new()
            .with_fn("echo", |ctx| Ok(ctx.input().clone()))
            .with_fn("fail", |_| anyhow::bail!("nope"));

        assert_eq!(registry.names(), vec!["echo", "fail"]);
        assert!(registry.contains("echo"));
        assert!(registry.get("missing").is_none());

        let ctx = ExecutionContext::new(json!({"x": 1}));
        let echo = registry.get("echo").unwrap();
        assert_eq!(echo.call(&ctx).await.unwrap(), json!({"x": 1}));

        let fail = registry.get("fail").unwrap();
        assert_eq!(fail.call(&ctx).await.unwrap_err().to_string(), "nope");
    }
}
