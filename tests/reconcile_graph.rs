use std::any::Any;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use repatch::{
    shared_patchbay, BuildFuture, FactoryKey, Fitting, MemoryPatchbay, NodeFactory, PatchEngine,
    PortId, RebuildHandle, Stage, StageFitting, WiringContext,
};

type EventLog = Arc<Mutex<Vec<String>>>;

fn push(log: &EventLog, event: String) {
    log.lock().unwrap().push(event);
}

fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn count(events: &[String], needle: &str) -> usize {
    events.iter().filter(|e| *e == needle).count()
}

/// Test factory recording construction and open/close activity, with a fixed
/// dependency list.
struct Probe {
    name: &'static str,
    deps: Vec<Arc<dyn NodeFactory>>,
    log: EventLog,
    fail_build: bool,
}

impl Probe {
    fn new(name: &'static str, log: &EventLog) -> Arc<Self> {
        Self::with_deps(name, log, Vec::new())
    }

    fn with_deps(name: &'static str, log: &EventLog, deps: Vec<Arc<dyn NodeFactory>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            deps,
            log: log.clone(),
            fail_build: false,
        })
    }

    fn failing(name: &'static str, log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            name,
            deps: Vec::new(),
            log: log.clone(),
            fail_build: true,
        })
    }
}

fn dep(probe: &Arc<Probe>) -> Arc<dyn NodeFactory> {
    probe.clone()
}

impl NodeFactory for Probe {
    fn key(&self) -> FactoryKey {
        FactoryKey::new("probe", self.name)
    }

    fn build(&self, rebuild: RebuildHandle) -> BuildFuture {
        let name = self.name;
        let deps = self.deps.clone();
        let log = self.log.clone();
        let fail = self.fail_build;
        Box::pin(async move {
            if fail {
                push(&log, format!("build_failed:{name}"));
                return Err(anyhow!("construction refused for {name}"));
            }
            push(&log, format!("build:{name}"));
            Ok(Box::new(ProbeFitting {
                name,
                deps,
                log,
                _rebuild: rebuild,
            }) as Box<dyn Fitting>)
        })
    }
}

struct ProbeFitting {
    name: &'static str,
    deps: Vec<Arc<dyn NodeFactory>>,
    log: EventLog,
    _rebuild: RebuildHandle,
}

impl Fitting for ProbeFitting {
    fn open(&mut self, ctx: &mut WiringContext<'_>) -> Result<()> {
        for dep in &self.deps {
            if let Err(err) = ctx.fitting(&dep.key()) {
                push(&self.log, format!("open_failed:{}", self.name));
                return Err(err);
            }
        }
        push(&self.log, format!("open:{}", self.name));
        Ok(())
    }

    fn close(&mut self, _ctx: &mut WiringContext<'_>) -> Result<()> {
        push(&self.log, format!("close:{}", self.name));
        Ok(())
    }

    fn deps(&self) -> Vec<Arc<dyn NodeFactory>> {
        self.deps.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn probe_key(name: &str) -> FactoryKey {
    FactoryKey::new("probe", name)
}

fn engine_over_memory_bay() -> PatchEngine {
    let _ = repatch::logging::init(None);
    PatchEngine::new(shared_patchbay(MemoryPatchbay::new()))
}

#[tokio::test]
async fn registering_a_root_activates_its_whole_dependency_chain() {
    let log = EventLog::default();
    let engine = engine_over_memory_bay();

    let a = Probe::new("a", &log);
    let b = Probe::with_deps("b", &log, vec![dep(&a)]);
    let c = Probe::with_deps("c", &log, vec![dep(&b)]);

    engine.register_root(c).await;
    engine.settle().await;

    assert_eq!(
        engine.active_keys().await,
        vec![probe_key("a"), probe_key("b"), probe_key("c")]
    );

    let ev = events(&log);
    for name in ["a", "b", "c"] {
        assert_eq!(count(&ev, &format!("build:{name}")), 1);
        assert_eq!(count(&ev, &format!("open:{name}")), 1);
        assert_eq!(count(&ev, &format!("close:{name}")), 0);
    }
    // Every open saw its dependencies already looked up successfully.
    assert!(!ev.iter().any(|e| e.starts_with("open_failed")));
}

#[tokio::test]
async fn root_with_one_dependency_scenario() {
    let log = EventLog::default();
    let engine = engine_over_memory_bay();

    let f1 = Probe::new("f1", &log);
    let f2 = Probe::with_deps("f2", &log, vec![dep(&f1)]);

    engine.register_root(f2).await;
    engine.settle().await;

    assert_eq!(
        engine.active_keys().await,
        vec![probe_key("f1"), probe_key("f2")]
    );
    let ev = events(&log);
    assert_eq!(count(&ev, "build:f1"), 1);
    assert_eq!(count(&ev, "open:f1"), 1);
    assert_eq!(count(&ev, "close:f1"), 0);
    assert_eq!(count(&ev, "build:f2"), 1);
    assert_eq!(count(&ev, "open:f2"), 1);
}

#[tokio::test]
async fn idle_trigger_performs_no_opens_or_closes() {
    let log = EventLog::default();
    let engine = engine_over_memory_bay();

    let a = Probe::new("a", &log);
    let b = Probe::with_deps("b", &log, vec![dep(&a)]);
    engine.register_root(b).await;
    engine.settle().await;

    let before = events(&log);
    engine.reevaluate();
    engine.settle().await;
    engine.settle().await;

    assert_eq!(events(&log), before);
}

#[tokio::test]
async fn broken_construction_is_contained_to_its_branch() {
    let log = EventLog::default();
    let engine = engine_over_memory_bay();

    let broken = Probe::failing("x", &log);
    let healthy = Probe::new("a", &log);
    let parent = Probe::with_deps("p", &log, vec![dep(&broken)]);

    engine.register_root(parent).await;
    engine.register_root(healthy).await;
    engine.settle().await;

    // The broken node never becomes active, the unrelated branch does, and
    // the parent is opened anyway: its dependency lookup fails and the
    // failure is logged and swallowed by design.
    assert_eq!(
        engine.active_keys().await,
        vec![probe_key("a"), probe_key("p")]
    );
    let ev = events(&log);
    assert_eq!(count(&ev, "build_failed:x"), 1);
    assert_eq!(count(&ev, "open_failed:p"), 1);
    assert_eq!(count(&ev, "open:a"), 1);
}

#[tokio::test]
async fn stage_chain_wires_the_patchbay() {
    let bay = MemoryPatchbay::new();
    let view = bay.clone();
    let engine = PatchEngine::new(shared_patchbay(bay));

    let src = Arc::new(Stage::new("src", PortId::new("src.out")));
    let sink = Arc::new(Stage::with_upstream("sink", PortId::new("sink.in"), src));

    engine.register_root(sink).await;
    engine.settle().await;

    assert!(view.is_connected(&PortId::new("src.out"), &PortId::new("sink.in")));
    assert_eq!(view.connection_count(), 1);

    // Top-level lookup reaches the live fitting.
    let handle = engine
        .fitting(&FactoryKey::new("stage", "sink"))
        .await
        .expect("sink active");
    let guard = handle.lock();
    let sink_fitting = guard
        .as_any()
        .downcast_ref::<StageFitting>()
        .expect("stage fitting");
    assert_eq!(sink_fitting.wired_to(), Some(&PortId::new("src.out")));
}
