//! Test support: an in-memory host and drivers for the commit loop.
//!
//! [`FakeHost`] is a clonable handle over shared state, so a test can
//! hand one clone to the runtime and keep another for inspection. It
//! applies every patch to a per-instance data object the way a real view
//! layer would, records the patch history, and parks commit ids until
//! the test (or [`pump`]) reports them back.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::host::{CommitId, DataPatch, Host};
use crate::instance::{create_instance, init_instance, InstanceHandle};
use crate::options::{resolve_options, ComponentOptions};
use crate::registry::{InstanceKind, Vid};
use crate::runtime::Runtime;

#[derive(Default)]
struct FakeHostState {
    data: IndexMap<Vid, Map<String, Value>>,
    patches: IndexMap<Vid, Vec<DataPatch>>,
    pending: Vec<CommitId>,
    methods: IndexMap<Vid, Vec<String>>,
    events: Vec<(Vid, String, Value)>,
}

/// In-memory [`Host`] for tests.
#[derive(Clone, Default)]
pub struct FakeHost {
    inner: Rc<RefCell<FakeHostState>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// The accumulated data object for `vid`, after every applied patch.
    pub fn data(&self, vid: &Vid) -> Option<Map<String, Value>> {
        self.inner.borrow().data.get(vid).cloned()
    }

    /// Every patch sent to `vid`, in order.
    pub fn patches(&self, vid: &Vid) -> Vec<DataPatch> {
        self.inner
            .borrow()
            .patches
            .get(vid)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop the recorded patch history. Applied data stays.
    pub fn clear_patches(&self) {
        self.inner.borrow_mut().patches.clear();
    }

    /// Names exposed for `vid` via [`Host::expose_method`], in order.
    pub fn methods(&self, vid: &Vid) -> Vec<String> {
        self.inner
            .borrow()
            .methods
            .get(vid)
            .cloned()
            .unwrap_or_default()
    }

    /// Events fired via [`Host::trigger_event`], in order.
    pub fn events(&self) -> Vec<(Vid, String, Value)> {
        self.inner.borrow().events.clone()
    }

    /// Take the commits not yet reported back to the runtime.
    pub fn take_pending(&self) -> Vec<CommitId> {
        std::mem::take(&mut self.inner.borrow_mut().pending)
    }

    pub fn pending_len(&self) -> usize {
        self.inner.borrow().pending.len()
    }

    /// Preload the data object for `vid`, as if earlier patches had
    /// already been applied.
    pub fn seed_data(&self, vid: &Vid, data: Map<String, Value>) {
        self.inner.borrow_mut().data.insert(vid.clone(), data);
    }
}

impl Host for FakeHost {
    fn set_data(&mut self, vid: &Vid, patch: DataPatch, commit: CommitId) {
        let mut state = self.inner.borrow_mut();
        let data = state.data.entry(vid.clone()).or_default();
        apply_patch(data, &patch);
        state.patches.entry(vid.clone()).or_default().push(patch);
        state.pending.push(commit);
    }

    fn host_data(&self, vid: &Vid) -> Option<Value> {
        self.inner.borrow().data.get(vid).cloned().map(Value::Object)
    }

    fn expose_method(&mut self, vid: &Vid, name: &str) {
        self.inner
            .borrow_mut()
            .methods
            .entry(vid.clone())
            .or_default()
            .push(name.to_owned());
    }

    fn trigger_event(&mut self, vid: &Vid, event: &str, detail: Value) {
        self.inner
            .borrow_mut()
            .events
            .push((vid.clone(), event.to_owned(), detail));
    }
}

/// Drive the runtime until it goes idle: flush the queues, report every
/// outstanding commit, repeat.
pub fn pump(rt: &mut Runtime, host: &FakeHost) {
    loop {
        rt.flush();
        let pending = host.take_pending();
        if pending.is_empty() && !rt.is_flush_pending() {
            return;
        }
        for commit in pending {
            rt.complete_commit(commit);
        }
    }
}

/// A standalone mounted component with empty options, for tests that
/// need an instance without the full define/launch choreography.
pub fn scratch_instance(rt: &mut Runtime) -> InstanceHandle {
    let options = resolve_options(rt, InstanceKind::Component, None, ComponentOptions::new());
    let instance = create_instance(rt, InstanceKind::Component, None, options);
    init_instance(rt, &instance);
    instance.borrow_mut().is_mounted = true;
    instance
}

enum PathSeg {
    Key(String),
    Index(usize),
}

/// `items[3].label` -> `[Key("items"), Index(3), Key("label")]`.
fn parse_path(path: &str) -> Vec<PathSeg> {
    let mut segs = Vec::new();
    for part in path.split('.') {
        match part.split_once('[') {
            None => segs.push(PathSeg::Key(part.to_owned())),
            Some((name, brackets)) => {
                if !name.is_empty() {
                    segs.push(PathSeg::Key(name.to_owned()));
                }
                for chunk in brackets.split('[') {
                    if let Ok(index) = chunk.trim_end_matches(']').parse::<usize>() {
                        segs.push(PathSeg::Index(index));
                    }
                }
            }
        }
    }
    segs
}

/// Apply one flat patch the way the view layer does: walk each path,
/// growing objects and arrays as needed, and set the leaf.
pub fn apply_patch(data: &mut Map<String, Value>, patch: &DataPatch) {
    for (path, value) in patch {
        let segs = parse_path(path);
        let Some((PathSeg::Key(key), rest)) = segs.split_first() else {
            continue;
        };
        let slot = data.entry(key.clone()).or_insert(Value::Null);
        write_seg(slot, rest, value.clone());
    }
}

fn write_seg(slot: &mut Value, segs: &[PathSeg], value: Value) {
    let Some((seg, rest)) = segs.split_first() else {
        *slot = value;
        return;
    };
    match seg {
        PathSeg::Key(key) => {
            if !matches!(slot, Value::Object(_)) {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(map) = slot {
                let child = map.entry(key.clone()).or_insert(Value::Null);
                write_seg(child, rest, value);
            }
        }
        PathSeg::Index(index) => {
            if !matches!(slot, Value::Array(_)) {
                *slot = Value::Array(Vec::new());
            }
            if let Value::Array(items) = slot {
                while items.len() <= *index {
                    items.push(Value::Null);
                }
                write_seg(&mut items[*index], rest, value);
            }
        }
    }
}
