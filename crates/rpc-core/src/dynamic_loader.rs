//! The dynamic router loader (spec C10): defers resolving a router to an
//! async factory, used both as a standalone utility and, with caching
//! layered on top, as the implementation behind a router's lazy mount
//! (spec §4.8's "factory" mount kind).

use crate::router::Router;
use crate::support::BoxFuture;
use rpc_protocol::RpcError;
use std::collections::HashMap;
use std::sync::Arc;

/// One export of a resolved module. `Other` carries a debug label so
/// ambiguity/type-mismatch errors can name what was actually found.
pub enum ModuleExport {
    Router(Arc<Router>),
    Other(String),
}

pub type ModuleFactory =
    Arc<dyn Fn() -> BoxFuture<'static, HashMap<String, ModuleExport>> + Send + Sync>;

/// Re-runs its factory on every call; callers that want caching (like a
/// router's lazy mount) layer it on themselves.
pub struct DynamicLoader {
    factory: ModuleFactory,
}

impl DynamicLoader {
    pub fn new(factory: ModuleFactory) -> Self {
        DynamicLoader { factory }
    }

    /// Resolves the factory's module. Zero exports is an error, more than
    /// one export is ambiguous, and a single export that isn't a router
    /// is also rejected — the loader only ever hands back exactly one
    /// router.
    pub async fn resolve(&self) -> Result<Arc<Router>, RpcError> {
        let module = (self.factory)().await;
        resolve_module(module)
    }
}

pub(crate) fn resolve_module(
    module: HashMap<String, ModuleExport>,
) -> Result<Arc<Router>, RpcError> {
    if module.is_empty() {
        return Err(RpcError::EmptyModule);
    }
    if module.len() > 1 {
        let mut names: Vec<String> = module.keys().cloned().collect();
        names.sort();
        return Err(RpcError::AmbiguousModule(names));
    }
    let (name, export) = module.into_iter().next().expect("checked non-empty above");
    match export {
        ModuleExport::Router(router) => Ok(router),
        ModuleExport::Other(label) => Err(RpcError::NotARouter(format!("{name}: {label}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Router;

    fn single(name: &str, export: ModuleExport) -> HashMap<String, ModuleExport> {
        let mut m = HashMap::new();
        m.insert(name.to_owned(), export);
        m
    }

    #[tokio::test]
    async fn empty_module_is_rejected() {
        let loader = DynamicLoader::new(Arc::new(|| Box::pin(async { HashMap::new() })));
        assert!(matches!(loader.resolve().await, Err(RpcError::EmptyModule)));
    }

    #[tokio::test]
    async fn ambiguous_module_lists_candidates() {
        let loader = DynamicLoader::new(Arc::new(|| {
            Box::pin(async {
                let mut m = HashMap::new();
                m.insert("a".to_owned(), ModuleExport::Other("Number".into()));
                m.insert("b".to_owned(), ModuleExport::Other("Number".into()));
                m
            })
        }));
        match loader.resolve().await {
            Err(RpcError::AmbiguousModule(names)) => assert_eq!(names, vec!["a", "b"]),
            other => panic!("expected ambiguous module, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_non_router_export_is_rejected() {
        let module = single("default", ModuleExport::Other("String".into()));
        assert!(matches!(resolve_module(module), Err(RpcError::NotARouter(_))));
    }

    #[tokio::test]
    async fn single_router_export_resolves() {
        let router = Arc::new(Router::new());
        let module = single("default", ModuleExport::Router(router));
        assert!(resolve_module(module).is_ok());
    }
}
