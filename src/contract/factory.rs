// src/contract/factory.rs

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use anyhow::Result;

use crate::contract::fitting::Fitting;
use crate::lifecycle::RebuildHandle;

/// Comparable identity of a desired pipeline node.
///
/// Two factories describing the same desired node must produce equal keys;
/// the engine uses keys for map-based deduplication of the reachable set, so
/// identity is explicit rather than relying on pointer equality of the
/// factory objects themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FactoryKey {
    kind: &'static str,
    id: String,
}

impl FactoryKey {
    /// Build a key from a node kind (e.g. `"stage"`) and an instance id.
    pub fn new(kind: &'static str, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for FactoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Future returned by [`NodeFactory::build`].
pub type BuildFuture = Pin<Box<dyn Future<Output = Result<Box<dyn Fitting>>> + Send>>;

/// Descriptor of a node that should exist in the pipeline.
///
/// Contract: `build` must be free of side effects on the shared patchbay;
/// only the resulting fitting's `open`/`close` may touch it. The engine may
/// construct a fitting purely to inspect its `deps()` before deciding whether
/// it will ultimately be used.
///
/// The [`RebuildHandle`] passed to `build` is the node's persistent
/// capability to request its own recreation; fittings that never rebuild
/// themselves may ignore it.
pub trait NodeFactory: Send + Sync {
    /// Stable comparable identity for this desired node.
    fn key(&self) -> FactoryKey;

    /// Asynchronously construct the node instance.
    fn build(&self, rebuild: RebuildHandle) -> BuildFuture;
}
