// src/engine/reconcile.rs

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::{debug, info, warn};

use crate::contract::{lock_patchbay, FactoryKey, FittingHandle, NodeFactory, SharedPatchbay};
use crate::engine::debounce::ReevalTrigger;
use crate::lifecycle::context::{forced_drain, ForcedSet, WiringContext};
use crate::lifecycle::{NodeHolder, NodeState};

/// The engine's graph state: registered roots, the live node set, holders
/// constructed mid-pass, and the shared force-rebuild set.
///
/// Between passes a factory occupies at most one of active/pending. During a
/// pass, a forced factory's replacement lives in pending while the retiring
/// instance is still active; the commit closes the old instance before
/// opening the new one, restoring the invariant.
pub(crate) struct EngineState {
    roots: HashMap<FactoryKey, Arc<dyn NodeFactory>>,
    active: HashMap<FactoryKey, NodeHolder>,
    pending: HashMap<FactoryKey, NodeHolder>,
    forced: ForcedSet,
    trigger: Arc<OnceLock<ReevalTrigger>>,
}

impl EngineState {
    pub(crate) fn new(forced: ForcedSet, trigger: Arc<OnceLock<ReevalTrigger>>) -> Self {
        Self {
            roots: HashMap::new(),
            active: HashMap::new(),
            pending: HashMap::new(),
            forced,
            trigger,
        }
    }

    pub(crate) fn add_root(&mut self, factory: Arc<dyn NodeFactory>) {
        let key = factory.key();
        if self.roots.insert(key.clone(), factory).is_some() {
            debug!(node = %key, "root re-registered");
        } else {
            info!(node = %key, "root registered");
        }
    }

    pub(crate) fn remove_root(&mut self, key: &FactoryKey) -> bool {
        let removed = self.roots.remove(key).is_some();
        if removed {
            info!(node = %key, "root removed");
        } else {
            warn!(node = %key, "remove_root for unknown root; ignoring");
        }
        removed
    }

    pub(crate) fn active_fitting(&self, key: &FactoryKey) -> Option<FittingHandle> {
        self.active.get(key).and_then(|h| h.fitting())
    }

    pub(crate) fn active_keys(&self) -> Vec<FactoryKey> {
        let mut keys: Vec<FactoryKey> = self.active.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn rebuild_trigger(&self) -> ReevalTrigger {
        self.trigger
            .get()
            .cloned()
            .unwrap_or_else(ReevalTrigger::disconnected)
    }

    /// One reevaluation pass: traverse from the roots, construct what is
    /// missing, diff against the live set, and commit the delta under the
    /// patchbay lock.
    ///
    /// Failures during construction are contained per branch. The force set
    /// is drained at pass start so rebuild requests issued *during* the pass
    /// survive into the trailing pass.
    pub(crate) async fn reconcile(&mut self, patchbay: &SharedPatchbay) {
        let forced = forced_drain(&self.forced);
        if !forced.is_empty() {
            debug!(count = forced.len(), "forced rebuilds this pass");
        }

        // Traversal: reachable closure from the roots, awaiting readiness of
        // each newly constructed holder before reading its dependencies.
        let mut reachable: HashSet<FactoryKey> = HashSet::new();
        let mut broken: HashSet<FactoryKey> = HashSet::new();
        let mut edges: Vec<(FactoryKey, FactoryKey)> = Vec::new();
        let mut stack: Vec<(Option<FactoryKey>, Arc<dyn NodeFactory>)> = self
            .roots
            .values()
            .map(|f| (None, Arc::clone(f)))
            .collect();

        while let Some((parent, factory)) = stack.pop() {
            let key = factory.key();
            if let Some(parent) = parent {
                edges.push((parent, key.clone()));
            }
            if broken.contains(&key) || !reachable.insert(key.clone()) {
                continue;
            }
            match self.ensure_holder(&key, &factory, &forced).await {
                Some(deps) => {
                    for dep in deps {
                        stack.push((Some(key.clone()), dep));
                    }
                }
                None => {
                    reachable.remove(&key);
                    broken.insert(key);
                }
            }
        }

        assert_acyclic(&edges);

        // Holders built this pass for branches that turned out unreachable
        // (or broken parents) are discarded unopened; construction is
        // side-effect-free, so nothing needs unwinding.
        self.pending.retain(|key, _| {
            let keep = reachable.contains(key);
            if !keep {
                debug!(node = %key, "discarding unreachable pending holder");
            }
            keep
        });

        // Classify the delta.
        let mut newly_inactive: Vec<FactoryKey> = self
            .active
            .keys()
            .filter(|key| !reachable.contains(*key) || forced.contains(*key))
            .cloned()
            .collect();
        newly_inactive.sort();

        let mut newly_active: Vec<FactoryKey> = self.pending.keys().cloned().collect();
        newly_active.sort();

        if newly_inactive.is_empty() && newly_active.is_empty() {
            debug!("pass is a no-op; patchbay untouched");
            return;
        }

        info!(
            opens = newly_active.len(),
            closes = newly_inactive.len(),
            "committing pipeline delta"
        );

        // Commit: all closes before any opens, patchbay locked throughout.
        // Within each half the order is deterministic (sorted keys).
        let mut guard = lock_patchbay(patchbay);

        let close_view = fitting_view(self.active.iter());
        for key in newly_inactive {
            if let Some(mut holder) = self.active.remove(&key) {
                let mut ctx =
                    WiringContext::new(&mut **guard, &close_view, holder.rebuild_handle());
                holder.close(&mut ctx);
            }
        }

        let open_view = fitting_view(self.active.iter().chain(self.pending.iter()));
        for key in newly_active {
            if let Some(mut holder) = self.pending.remove(&key) {
                let mut ctx =
                    WiringContext::new(&mut **guard, &open_view, holder.rebuild_handle());
                holder.open(&mut ctx);
                self.active.insert(key, holder);
            }
        }

        drop(guard);
        debug!(active = self.active.len(), "commit complete");
    }

    /// Make sure a holder exists for `key` and return its current
    /// dependencies, or `None` if the branch is broken.
    ///
    /// An active holder is reused (unless forced) with its dependencies read
    /// fresh; a ready pending holder from earlier in this pass is reused
    /// as-is; anything else is constructed now and awaited.
    async fn ensure_holder(
        &mut self,
        key: &FactoryKey,
        factory: &Arc<dyn NodeFactory>,
        forced: &HashSet<FactoryKey>,
    ) -> Option<Vec<Arc<dyn NodeFactory>>> {
        if !forced.contains(key) {
            if let Some(holder) = self.active.get(key) {
                return Some(holder.deps_snapshot());
            }
            if let Some(holder) = self.pending.get_mut(key) {
                if holder.wait_ready().await {
                    return Some(holder.deps_snapshot());
                }
                self.pending.remove(key);
                return None;
            }
        }

        let mut holder = NodeHolder::spawn(factory, Arc::clone(&self.forced), self.rebuild_trigger());
        if holder.wait_ready().await {
            let deps = holder.deps_snapshot();
            debug_assert_eq!(holder.state(), NodeState::Ready);
            self.pending.insert(key.clone(), holder);
            Some(deps)
        } else {
            None
        }
    }
}

fn fitting_view<'a>(
    holders: impl Iterator<Item = (&'a FactoryKey, &'a NodeHolder)>,
) -> HashMap<FactoryKey, FittingHandle> {
    holders
        .filter_map(|(key, holder)| holder.fitting().map(|f| (key.clone(), f)))
        .collect()
}

/// The factory graph is required to be acyclic; a cycle is a caller error,
/// not a recoverable runtime condition.
fn assert_acyclic(edges: &[(FactoryKey, FactoryKey)]) {
    let mut graph: DiGraphMap<&FactoryKey, ()> = DiGraphMap::new();
    for (parent, dep) in edges {
        graph.add_edge(parent, dep, ());
    }
    if let Err(cycle) = toposort(&graph, None) {
        panic!(
            "dependency cycle involving node '{}'; factory graphs must be acyclic",
            cycle.node_id()
        );
    }
}
