//! Lifecycle hooks
//!
//! Named hook lists run around agent start and stop so embedders can
//! attach behavior without patching the coordinator.

use tracing::debug;

type Hook<T> = Box<dyn Fn(&T) + Send + Sync>;

/// An ordered, named list of callbacks over `T`.
pub struct HookManager<T> {
    hooks: Vec<(String, Hook<T>)>,
}

impl<T> Default for HookManager<T> {
    fn default() -> Self {
        Self { hooks: Vec::new() }
    }
}

impl<T> HookManager<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, hook: impl Fn(&T) + Send + Sync + 'static) {
        self.hooks.push((name.into(), Box::new(hook)));
    }

    /// Add a hook that runs before every existing one.
    pub fn add_first(
        &mut self,
        name: impl Into<String>,
        hook: impl Fn(&T) + Send + Sync + 'static,
    ) {
        self.hooks.insert(0, (name.into(), Box::new(hook)));
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|(n, _)| n != name);
        self.hooks.len() != before
    }

    pub fn exec(&self, target: &T) {
        for (name, hook) in &self.hooks {
            debug!(hook = name.as_str(), "running hook");
            hook(target);
        }
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn hooks_run_in_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut hooks: HookManager<()> = HookManager::new();

        let o = order.clone();
        hooks.add("second", move |_| o.lock().push("second"));
        let o = order.clone();
        hooks.add_first("first", move |_| o.lock().push("first"));

        hooks.exec(&());
        assert_eq!(order.lock().as_slice(), &["first", "second"]);
    }

    #[test]
    fn removed_hooks_do_not_run() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut hooks: HookManager<()> = HookManager::new();
        let c = count.clone();
        hooks.add("counter", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(hooks.remove("counter"));
        hooks.exec(&());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
