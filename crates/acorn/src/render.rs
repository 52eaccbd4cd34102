//! Update scheduling and the mount/unmount paths.
//!
//! State writes never reach the host directly. A changed key is merged
//! into a per-instance change set, a render job is queued, and the flush
//! reads the current values, diffs them against the host copy when path
//! optimization is on, and sends one patch. Per instance at most one
//! commit is in flight; further sends park on the instance and are
//! released in order as commits settle.

use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};

use crate::diff::{diff, Diff};
use crate::host::DataPatch;
use crate::instance::{unload_instance, Binding, InstanceHandle};
use crate::lifecycle::Lifecycle;
use crate::refs::clear_ref_value;
use crate::registry::Vid;
use crate::runtime::Runtime;
use crate::scheduler::Job;
use crate::state::instance_get;

/// Pending view updates, keyed by instance.
#[derive(Default)]
pub(crate) struct Renderer {
    /// Changed state keys per instance, in change order.
    merge: IndexMap<Vid, IndexSet<String>>,
    /// Instances with a queued render job.
    queued: IndexSet<Vid>,
}

impl Renderer {
    pub(crate) fn forget(&mut self, vid: &Vid) {
        self.merge.shift_remove(vid);
        self.queued.shift_remove(vid);
    }
}

/// Record that `key` changed on `instance` and schedule a render flush.
/// Changes on unmounted instances or dead scopes are dropped. Before
/// mount the keys accumulate; the mount completion queues the flush.
pub(crate) fn merge_data_change(rt: &mut Runtime, instance: &InstanceHandle, key: &str) {
    let (vid, scope, mounted, unmounted) = {
        let i = instance.borrow();
        (i.vid().clone(), i.scope, i.is_mounted(), i.is_unmounted())
    };
    if unmounted || !rt.reactivity.is_scope_active(scope) {
        return;
    }

    rt.renderer
        .merge
        .entry(vid.clone())
        .or_default()
        .insert(key.to_owned());

    if mounted {
        queue_render_job(rt, vid);
    }
}

fn queue_render_job(rt: &mut Runtime, vid: Vid) {
    if !rt.renderer.queued.insert(vid.clone()) {
        return;
    }
    rt.scheduler.queue_job(Box::new(move |rt| run_merge_data(rt, &vid)));
}

/// Flush the merged changes of one instance into a single send.
pub(crate) fn run_merge_data(rt: &mut Runtime, vid: &Vid) {
    rt.renderer.queued.shift_remove(vid);
    let Some(keys) = rt.renderer.merge.shift_remove(vid) else {
        return;
    };
    let Some(instance) = rt.registry.instance(vid) else {
        return;
    };
    if instance.borrow().is_unmounted() {
        return;
    }

    let data = get_update_data(&instance, &keys);
    if data.is_empty() {
        return;
    }

    rt.dispatch_lifecycle(&instance, Lifecycle::BeforeUpdate, &[]);
    let handle = instance.clone();
    diff_set_data(
        rt,
        &instance,
        data,
        Some(Box::new(move |rt| {
            rt.dispatch_lifecycle(&handle, Lifecycle::Updated, &[]);
        })),
    );
}

/// Read the current values of the changed keys. Callable bindings never
/// travel to the host; a key that resolves nowhere is sent as `null` so
/// the host clears it.
fn get_update_data(instance: &InstanceHandle, keys: &IndexSet<String>) -> Map<String, Value> {
    let mut data = Map::new();
    for key in keys {
        match instance_get(instance, key) {
            Some(Binding::Value(value)) => {
                data.insert(key.clone(), value);
            }
            Some(_) => {}
            None => {
                data.insert(key.clone(), Value::Null);
            }
        }
    }
    data
}

/// Send `data` to the host, as path patches when the definition has path
/// optimization on and the host keeps a data copy to diff against.
/// `on_settled` runs once the commit is reported back.
pub(crate) fn diff_set_data(
    rt: &mut Runtime,
    instance: &InstanceHandle,
    data: Map<String, Value>,
    on_settled: Option<Job>,
) {
    let (vid, optimize) = {
        let i = instance.borrow();
        let optimize = i
            .options()
            .config_enabled("optimizePath", rt.global_config());
        (i.vid().clone(), optimize)
    };

    let patch: DataPatch = match rt.host.host_data(&vid) {
        Some(Value::Object(old)) if optimize => match diff(&data, &old) {
            Diff::Unchanged => {
                if let Some(job) = on_settled {
                    rt.scheduler.queue_post_flush(job);
                }
                return;
            }
            Diff::Patch(patch) => patch,
        },
        _ => data.into_iter().collect(),
    };

    if patch.is_empty() {
        if let Some(job) = on_settled {
            rt.scheduler.queue_post_flush(job);
        }
        return;
    }
    call_instance_set_data(rt, instance, patch, on_settled);
}

/// The per-instance send gate. One commit in flight at a time; while one
/// is open, further sends park on the pending branch and are replayed in
/// order after the commit settles.
pub(crate) fn call_instance_set_data(
    rt: &mut Runtime,
    instance: &InstanceHandle,
    patch: DataPatch,
    on_settled: Option<Job>,
) {
    let in_flight = instance.borrow().loading_branch.is_some();
    if in_flight {
        let handle = instance.clone();
        instance
            .borrow_mut()
            .push_pending_branch(Box::new(move |rt| {
                call_instance_set_data(rt, &handle, patch, on_settled);
            }));
        return;
    }

    {
        let mut i = instance.borrow_mut();
        let callbacks = i.loading_branch.insert(Vec::new());
        if let Some(job) = on_settled {
            callbacks.push(job);
        }
    }

    let vid = instance.borrow().vid().clone();
    let handle = instance.clone();
    rt.send_patch(
        &vid,
        patch,
        Some(Box::new(move |rt| settle_commit(rt, &handle))),
    );
}

/// Runs when the host reports the in-flight commit: fire the commit
/// callbacks, then release the parked sends after the queue settles.
fn settle_commit(rt: &mut Runtime, instance: &InstanceHandle) {
    let callbacks = instance.borrow_mut().loading_branch.take().unwrap_or_default();
    for job in callbacks {
        job(rt);
    }
    run_render_pending_branch(rt, instance);
}

fn run_render_pending_branch(rt: &mut Runtime, instance: &InstanceHandle) {
    let handle = instance.clone();
    rt.scheduler.queue_post_flush(Box::new(move |rt| {
        // Bind first so the RefMut drops before the jobs re-borrow.
        let jobs = handle.borrow_mut().clear_render_pending_branch();
        if let Some(jobs) = jobs {
            for job in jobs {
                job(rt);
            }
        }
    }));
}

/// Run `job` once every in-flight and parked send of `instance` has
/// settled, or on the next post-flush turn when nothing is pending.
pub fn next_tick_instance(rt: &mut Runtime, instance: &InstanceHandle, job: Job) {
    if instance.borrow().has_open_branch() {
        instance.borrow_mut().push_pending_branch(job);
    } else {
        rt.scheduler.queue_post_flush(job);
    }
}

/// First send: data plus the value bindings from setup, with callable
/// members exposed to the host by name. The mounted flag flips and the
/// mounted hooks fire only after the host reports the commit.
pub(crate) fn mount_instance(rt: &mut Runtime, instance: &InstanceHandle) {
    if instance.borrow().is_mounted() || instance.borrow().is_unmounted() {
        return;
    }

    rt.dispatch_lifecycle(instance, Lifecycle::BeforeMount, &[]);

    let vid = instance.borrow().vid().clone();
    let mut data = instance.borrow().data().clone();
    let mut methods: Vec<String> = Vec::new();
    for (name, binding) in instance.borrow().setup_state().iter() {
        match binding {
            Binding::Value(value) => {
                data.insert(name.clone(), value.clone());
            }
            Binding::Method(_) => methods.push(name.clone()),
            Binding::Hook(_) => {}
        }
    }
    for name in instance.borrow().options().methods.keys() {
        methods.push(name.clone());
    }
    for name in &methods {
        rt.host.expose_method(&vid, name);
    }

    let handle = instance.clone();
    let complete: Job = Box::new(move |rt| {
        if handle.borrow().is_unmounted() {
            return;
        }
        handle.borrow_mut().is_mounted = true;
        rt.dispatch_lifecycle(&handle, Lifecycle::Mounted, &[]);
        // Changes merged during mount were held back; flush them now.
        let vid = handle.borrow().vid().clone();
        if rt.renderer.merge.contains_key(&vid) {
            queue_render_job(rt, vid);
        }
    });

    if data.is_empty() {
        rt.scheduler.queue_post_flush(complete);
        return;
    }
    diff_set_data(rt, instance, data, Some(complete));
}

/// Tear an instance down. Refs clear first, then the unmount hooks run,
/// then the scope stops and the registry entry goes away. A second call
/// is a no-op.
pub(crate) fn unmount_instance(rt: &mut Runtime, instance: &InstanceHandle) {
    if instance.borrow().is_unmounted() {
        return;
    }

    clear_ref_value(rt, instance);
    rt.dispatch_lifecycle(instance, Lifecycle::BeforeUnmount, &[]);
    rt.dispatch_lifecycle(instance, Lifecycle::Unmounted, &[]);

    let vid = instance.borrow().vid().clone();
    unload_instance(rt, instance);
    rt.renderer.forget(&vid);
}
