// src/nodes/stage.rs

use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Result};

use crate::contract::{BuildFuture, FactoryKey, Fitting, NodeFactory, PortId};
use crate::lifecycle::{RebuildHandle, WiringContext};

type UpstreamSlot = Arc<Mutex<Option<Arc<dyn NodeFactory>>>>;

fn read_slot(slot: &UpstreamSlot) -> Option<Arc<dyn NodeFactory>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Canonical single-input wiring node: one processing element plus at most
/// one upstream dependency.
///
/// The upstream slot is shared between the factory and every fitting it
/// builds, so retargeting it changes what the live fitting reports from
/// `deps()` *and* what a rebuilt instance will wire to. Keys are derived from
/// the stage name only: the same name always describes the same desired node,
/// whatever it is currently patched to.
pub struct Stage {
    name: String,
    element: PortId,
    upstream: UpstreamSlot,
}

impl Stage {
    pub fn new(name: impl Into<String>, element: PortId) -> Self {
        Self {
            name: name.into(),
            element,
            upstream: UpstreamSlot::default(),
        }
    }

    pub fn with_upstream(
        name: impl Into<String>,
        element: PortId,
        upstream: Arc<dyn NodeFactory>,
    ) -> Self {
        let stage = Self::new(name, element);
        stage.set_upstream(Some(upstream));
        stage
    }

    /// Retarget the upstream dependency. Takes effect on the next
    /// reevaluation pass; pair with a rebuild request to re-wire the live
    /// instance.
    pub fn set_upstream(&self, upstream: Option<Arc<dyn NodeFactory>>) {
        *self.upstream.lock().unwrap_or_else(PoisonError::into_inner) = upstream;
    }

    pub fn element(&self) -> &PortId {
        &self.element
    }
}

impl NodeFactory for Stage {
    fn key(&self) -> FactoryKey {
        FactoryKey::new("stage", &self.name)
    }

    fn build(&self, rebuild: RebuildHandle) -> BuildFuture {
        let fitting = StageFitting {
            element: self.element.clone(),
            upstream: Arc::clone(&self.upstream),
            wired_to: None,
            rebuild,
        };
        Box::pin(async move { Ok(Box::new(fitting) as Box<dyn Fitting>) })
    }
}

/// Live instance of a [`Stage`].
///
/// `open` looks up the upstream fitting and connects its output port to this
/// stage's element; `close` disconnects exactly what was wired.
pub struct StageFitting {
    element: PortId,
    upstream: UpstreamSlot,
    /// Upstream port actually connected at open time, so close disconnects
    /// the same edge even if the slot was retargeted in between.
    wired_to: Option<PortId>,
    rebuild: RebuildHandle,
}

impl StageFitting {
    /// The upstream port this stage is currently wired to, if any.
    pub fn wired_to(&self) -> Option<&PortId> {
        self.wired_to.as_ref()
    }

    /// Ask the engine to recreate this stage on the next pass.
    pub fn request_rebuild(&self) {
        self.rebuild.request_rebuild();
    }
}

impl Fitting for StageFitting {
    fn open(&mut self, ctx: &mut WiringContext<'_>) -> Result<()> {
        let Some(upstream) = read_slot(&self.upstream) else {
            return Ok(());
        };
        let handle = ctx.fitting(&upstream.key())?;
        let port = handle
            .lock()
            .output_port()
            .ok_or_else(|| anyhow!("upstream node '{}' exposes no output port", upstream.key()))?;
        ctx.connect(&port, &self.element)?;
        self.wired_to = Some(port);
        Ok(())
    }

    fn close(&mut self, ctx: &mut WiringContext<'_>) -> Result<()> {
        if let Some(port) = self.wired_to.take() {
            ctx.disconnect(&port, &self.element)?;
        }
        Ok(())
    }

    fn deps(&self) -> Vec<Arc<dyn NodeFactory>> {
        read_slot(&self.upstream).into_iter().collect()
    }

    fn output_port(&self) -> Option<PortId> {
        Some(self.element.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
