use crate::collection::Document;
use crate::errors::DocStoreResult;
use crate::filter::Criteria;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Result of a before-hook.
///
/// Hooks run in registration order. `Rewrite` hands a replacement value to
/// the next hook and finally to the operation; `Cancel` stops the chain and
/// aborts the operation.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome<T> {
    Continue,
    Rewrite(T),
    Cancel,
}

/// Arguments of an update, as seen and rewritten by before-update hooks.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub criteria: Criteria,
    pub patch: Document,
}

pub type BeforeInsertHook = Arc<dyn Fn(&Document) -> DocStoreResult<HookOutcome<Document>> + Send + Sync>;
pub type AfterInsertHook = Arc<dyn Fn(&Document, &str) -> DocStoreResult<()> + Send + Sync>;
pub type BeforeUpdateHook = Arc<dyn Fn(&UpdateRequest) -> DocStoreResult<HookOutcome<UpdateRequest>> + Send + Sync>;
pub type AfterUpdateHook = Arc<dyn Fn(&Document, &Document) -> DocStoreResult<()> + Send + Sync>;
pub type BeforeRemoveHook = Arc<dyn Fn(&Document) -> DocStoreResult<HookOutcome<()>> + Send + Sync>;
pub type AfterRemoveHook = Arc<dyn Fn(&Document) -> DocStoreResult<()> + Send + Sync>;

/// Ordered lifecycle hooks of a collection.
///
/// # Failure handling
///
/// A hook that returns an error or panics is logged and skipped; the
/// operation and the remaining hooks go on as if it had returned
/// [HookOutcome::Continue]. Returning [HookOutcome::Cancel] is the only way
/// for a hook to abort an operation.
///
/// # Lock discipline
///
/// Hooks run outside the connection lock: before-hooks run before the write
/// transaction starts and after-hooks run after it commits, so a hook may
/// query the collection it is attached to.
#[derive(Clone, Default)]
pub struct HookChain {
    inner: Arc<HookChainInner>,
}

#[derive(Default)]
struct HookChainInner {
    before_insert: RwLock<Vec<BeforeInsertHook>>,
    after_insert: RwLock<Vec<AfterInsertHook>>,
    before_update: RwLock<Vec<BeforeUpdateHook>>,
    after_update: RwLock<Vec<AfterUpdateHook>>,
    before_remove: RwLock<Vec<BeforeRemoveHook>>,
    after_remove: RwLock<Vec<AfterRemoveHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_before_insert<F>(&self, hook: F)
    where
        F: Fn(&Document) -> DocStoreResult<HookOutcome<Document>> + Send + Sync + 'static,
    {
        self.inner.before_insert.write().push(Arc::new(hook));
    }

    pub fn on_after_insert<F>(&self, hook: F)
    where
        F: Fn(&Document, &str) -> DocStoreResult<()> + Send + Sync + 'static,
    {
        self.inner.after_insert.write().push(Arc::new(hook));
    }

    pub fn on_before_update<F>(&self, hook: F)
    where
        F: Fn(&UpdateRequest) -> DocStoreResult<HookOutcome<UpdateRequest>> + Send + Sync + 'static,
    {
        self.inner.before_update.write().push(Arc::new(hook));
    }

    pub fn on_after_update<F>(&self, hook: F)
    where
        F: Fn(&Document, &Document) -> DocStoreResult<()> + Send + Sync + 'static,
    {
        self.inner.after_update.write().push(Arc::new(hook));
    }

    /// Registers a per-document veto for physical removal. `Rewrite` is
    /// treated like `Continue`.
    pub fn on_before_remove<F>(&self, hook: F)
    where
        F: Fn(&Document) -> DocStoreResult<HookOutcome<()>> + Send + Sync + 'static,
    {
        self.inner.before_remove.write().push(Arc::new(hook));
    }

    pub fn on_after_remove<F>(&self, hook: F)
    where
        F: Fn(&Document) -> DocStoreResult<()> + Send + Sync + 'static,
    {
        self.inner.after_remove.write().push(Arc::new(hook));
    }

    /// Runs the before-insert chain. `None` means a hook cancelled.
    pub fn before_insert(&self, document: Document) -> Option<Document> {
        let hooks = self.inner.before_insert.read().clone();
        run_before_chain("before-insert", &hooks, document, |hook, doc| hook(doc))
    }

    pub fn after_insert(&self, document: &Document, id: &str) {
        let hooks = self.inner.after_insert.read().clone();
        for hook in hooks.iter() {
            guarded("after-insert", || hook(document, id));
        }
    }

    /// Runs the before-update chain. `None` means a hook cancelled.
    pub fn before_update(&self, request: UpdateRequest) -> Option<UpdateRequest> {
        let hooks = self.inner.before_update.read().clone();
        run_before_chain("before-update", &hooks, request, |hook, req| hook(req))
    }

    pub fn after_update(&self, original: &Document, updated: &Document) {
        let hooks = self.inner.after_update.read().clone();
        for hook in hooks.iter() {
            guarded("after-update", || hook(original, updated));
        }
    }

    /// `false` when a hook vetoes removing this document.
    pub fn before_remove(&self, document: &Document) -> bool {
        let hooks = self.inner.before_remove.read().clone();
        for hook in hooks.iter() {
            if let Some(HookOutcome::Cancel) = guarded("before-remove", || hook(document)) {
                return false;
            }
        }
        true
    }

    pub fn after_remove(&self, document: &Document) {
        let hooks = self.inner.after_remove.read().clone();
        for hook in hooks.iter() {
            guarded("after-remove", || hook(document));
        }
    }
}

fn run_before_chain<H, T, F>(stage: &str, hooks: &[H], value: T, call: F) -> Option<T>
where
    F: Fn(&H, &T) -> DocStoreResult<HookOutcome<T>>,
{
    let mut current = value;
    for hook in hooks {
        match guarded(stage, || call(hook, &current)) {
            Some(HookOutcome::Rewrite(replacement)) => current = replacement,
            Some(HookOutcome::Cancel) => {
                log::debug!("{} hook cancelled the operation", stage);
                return None;
            }
            Some(HookOutcome::Continue) | None => {}
        }
    }
    Some(current)
}

/// Calls a hook, turning an error or a panic into a logged `None`.
fn guarded<T, F>(stage: &str, call: F) -> Option<T>
where
    F: FnOnce() -> DocStoreResult<T>,
{
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            log::warn!("Ignoring failed {} hook: {}", stage, err);
            None
        }
        Err(_) => {
            log::warn!("Ignoring panicked {} hook", stage);
            None
        }
    }
}
