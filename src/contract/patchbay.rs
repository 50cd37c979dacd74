// src/contract/patchbay.rs

//! The shared pipeline resource.
//!
//! The patchbay is the structure that actually carries signal between nodes.
//! It is typically also driven by an independent execution context (e.g. a
//! real-time processing loop), which is why all structural mutation goes
//! through an exclusive lock: the engine holds it for the whole commit phase
//! of a reevaluation pass, and nothing observes a half-rewired pipeline.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};

/// Identifier of a connectable endpoint on the patchbay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(String);

impl PortId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Structural mutation surface of the shared pipeline resource.
///
/// Supplied by the embedding system. `connect`/`disconnect` are only ever
/// called while the engine holds the resource lock, from inside a fitting's
/// `open`/`close`; any other use is a contract violation of the caller.
pub trait Patchbay: Send {
    /// Create an edge from `from` to `to`.
    fn connect(&mut self, from: &PortId, to: &PortId) -> Result<()>;

    /// Remove the edge from `from` to `to`.
    fn disconnect(&mut self, from: &PortId, to: &PortId) -> Result<()>;
}

/// Shared, exclusively-lockable patchbay as the engine consumes it.
///
/// The embedding system keeps its own clone and locks it from its execution
/// context; the engine locks it for the commit phase of each pass.
pub type SharedPatchbay = Arc<Mutex<Box<dyn Patchbay>>>;

/// Wrap a concrete patchbay for sharing with the engine.
pub fn shared_patchbay(patchbay: impl Patchbay + 'static) -> SharedPatchbay {
    Arc::new(Mutex::new(Box::new(patchbay)))
}

/// Lock a shared patchbay, recovering from poisoning.
///
/// A panic on another context must not permanently wedge structural
/// reconfiguration, so the poison flag is ignored.
pub fn lock_patchbay(shared: &SharedPatchbay) -> MutexGuard<'_, Box<dyn Patchbay>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory reference patchbay: a plain set of directed edges.
///
/// Clones share the same underlying edge set, so embedding code (and tests)
/// can keep a clone around to observe what the engine wired up.
#[derive(Clone, Default)]
pub struct MemoryPatchbay {
    edges: Arc<Mutex<HashSet<(PortId, PortId)>>>,
}

impl MemoryPatchbay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an edge from `from` to `to` currently exists.
    pub fn is_connected(&self, from: &PortId, to: &PortId) -> bool {
        self.edges()
            .contains(&(from.clone(), to.clone()))
    }

    /// Number of edges currently patched.
    pub fn connection_count(&self) -> usize {
        self.edges().len()
    }

    fn edges(&self) -> MutexGuard<'_, HashSet<(PortId, PortId)>> {
        self.edges.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for MemoryPatchbay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPatchbay")
            .field("connections", &self.connection_count())
            .finish()
    }
}

impl Patchbay for MemoryPatchbay {
    fn connect(&mut self, from: &PortId, to: &PortId) -> Result<()> {
        if !self.edges().insert((from.clone(), to.clone())) {
            bail!("ports '{from}' and '{to}' are already connected");
        }
        Ok(())
    }

    fn disconnect(&mut self, from: &PortId, to: &PortId) -> Result<()> {
        if !self.edges().remove(&(from.clone(), to.clone())) {
            bail!("ports '{from}' and '{to}' are not connected");
        }
        Ok(())
    }
}
