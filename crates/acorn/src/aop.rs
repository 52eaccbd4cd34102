//! Member advice: before/after wrapping of definition members.
//!
//! Advice tables are registered per instance kind, globally by embedders
//! and privately by the runtime itself (event-argument normalization
//! rides on a private table). At resolution time each table is applied
//! to the raw member map in two passes: wrap what exists, then
//! synthesize advice-only members that the definition never declared.
//!
//! Advice failures never reach the member's caller. They go to the
//! wrap's own error advice when it has one, otherwise to the log, and
//! are swallowed; only the member's own error propagates, and even then
//! the after advice and the error advice still run first.

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{log_error, ErrorSource};
use crate::instance::{Binding, Callback, InstanceHandle};
use crate::registry::InstanceKind;
use crate::runtime::Runtime;

/// Before advice. Runs ahead of the member and may rewrite its argument
/// list in place; its return value seeds the wrapper result for
/// advice-only members.
pub type BeforeFn =
    Rc<dyn Fn(&mut Runtime, &InstanceHandle, &mut Vec<Value>) -> anyhow::Result<Option<Value>>>;

/// After advice. Receives the member result, the (possibly rewritten)
/// arguments and the member name; its return value replaces the result.
pub type AfterFn = Rc<
    dyn Fn(
        &mut Runtime,
        &InstanceHandle,
        Option<&Value>,
        &[Value],
        &str,
    ) -> anyhow::Result<Option<Value>>,
>;

/// Error advice. Receives advice and member failures together with the
/// member name; its own panics are not caught.
pub type AdviceErrorFn = Rc<dyn Fn(&mut Runtime, &InstanceHandle, &anyhow::Error, &str)>;

/// A before/after/error triple. Every side is optional.
#[derive(Clone, Default)]
pub struct AdviceWrap {
    pub before: Option<BeforeFn>,
    pub after: Option<AfterFn>,
    pub error: Option<AdviceErrorFn>,
}

impl AdviceWrap {
    pub fn before(
        f: impl Fn(&mut Runtime, &InstanceHandle, &mut Vec<Value>) -> anyhow::Result<Option<Value>>
            + 'static,
    ) -> Self {
        Self {
            before: Some(Rc::new(f)),
            ..Self::default()
        }
    }

    pub fn after(
        f: impl Fn(&mut Runtime, &InstanceHandle, Option<&Value>, &[Value], &str) -> anyhow::Result<Option<Value>>
            + 'static,
    ) -> Self {
        Self {
            after: Some(Rc::new(f)),
            ..Self::default()
        }
    }

    pub fn with_after(
        mut self,
        f: impl Fn(&mut Runtime, &InstanceHandle, Option<&Value>, &[Value], &str) -> anyhow::Result<Option<Value>>
            + 'static,
    ) -> Self {
        self.after = Some(Rc::new(f));
        self
    }

    pub fn with_error(
        mut self,
        f: impl Fn(&mut Runtime, &InstanceHandle, &anyhow::Error, &str) + 'static,
    ) -> Self {
        self.error = Some(Rc::new(f));
        self
    }
}

/// Per-member advice. Listing a member as `Untouched` shields it from
/// the table's catch-all.
#[derive(Clone)]
pub enum Advice {
    Untouched,
    Wrap(AdviceWrap),
}

/// One advice table: named member advice plus an optional catch-all that
/// wraps every member the table does not list.
#[derive(Clone, Default)]
pub struct AdviceTable {
    pub members: IndexMap<String, Advice>,
    pub catch_all: Option<AdviceWrap>,
}

impl AdviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn untouched(mut self, name: impl Into<String>) -> Self {
        self.members.insert(name.into(), Advice::Untouched);
        self
    }

    pub fn wrap(mut self, name: impl Into<String>, wrap: AdviceWrap) -> Self {
        self.members.insert(name.into(), Advice::Wrap(wrap));
        self
    }

    pub fn catch_all(mut self, wrap: AdviceWrap) -> Self {
        self.catch_all = Some(wrap);
        self
    }
}

/// Registered advice, global (embedder) and private (runtime-internal),
/// applied in registration order with global tables first.
#[derive(Default)]
pub struct AopRegistry {
    global: HashMap<InstanceKind, Vec<AdviceTable>>,
    private: HashMap<InstanceKind, Vec<AdviceTable>>,
}

impl AopRegistry {
    fn tables_for(&self, kind: InstanceKind) -> Vec<AdviceTable> {
        let mut tables = Vec::new();
        if let Some(global) = self.global.get(&kind) {
            tables.extend(global.iter().cloned());
        }
        if let Some(private) = self.private.get(&kind) {
            tables.extend(private.iter().cloned());
        }
        tables
    }
}

/// Register an advice table for every future definition of `kind`.
/// Definitions already resolved are not revisited.
pub fn register_aop(rt: &mut Runtime, kind: InstanceKind, table: AdviceTable) {
    rt.aop.global.entry(kind).or_default().push(table);
}

pub(crate) fn register_private_aop(rt: &mut Runtime, kind: InstanceKind, table: AdviceTable) {
    rt.aop.private.entry(kind).or_default().push(table);
}

/// Apply every registered table for `kind` to a raw member map.
pub(crate) fn apply_kind_aop(
    rt: &mut Runtime,
    kind: InstanceKind,
    members: &mut IndexMap<String, Callback>,
) {
    for table in rt.aop.tables_for(kind) {
        apply_table(&table, members, true);
    }
}

/// Apply every registered table for `kind` to the bindings a setup
/// function returned. Only callable bindings are wrapped and no members
/// are synthesized; setup output is taken as complete.
pub(crate) fn apply_setup_aop(
    rt: &mut Runtime,
    kind: InstanceKind,
    bindings: &mut IndexMap<String, Binding>,
) {
    let tables = rt.aop.tables_for(kind);
    if tables.is_empty() {
        return;
    }
    for (name, binding) in bindings.iter_mut() {
        let Binding::Method(cb) = binding else {
            continue;
        };
        let mut wrapped = cb.clone();
        for table in &tables {
            wrapped = match table.members.get(name) {
                Some(Advice::Untouched) => wrapped,
                Some(Advice::Wrap(wrap)) => wrap_member(name, Some(wrapped), wrap.clone()),
                None => match &table.catch_all {
                    Some(wrap) => wrap_member(name, Some(wrapped), wrap.clone()),
                    None => wrapped,
                },
            };
        }
        *binding = Binding::Method(wrapped);
    }
}

/// Apply one table: pass one wraps existing members, pass two (when
/// `synthesize` is set) creates advice-only members for named advice
/// that carries a before side.
pub(crate) fn apply_table(
    table: &AdviceTable,
    members: &mut IndexMap<String, Callback>,
    synthesize: bool,
) {
    for (name, cb) in members.iter_mut() {
        match table.members.get(name) {
            Some(Advice::Untouched) => {}
            Some(Advice::Wrap(wrap)) => *cb = wrap_member(name, Some(cb.clone()), wrap.clone()),
            None => {
                if let Some(wrap) = &table.catch_all {
                    *cb = wrap_member(name, Some(cb.clone()), wrap.clone());
                }
            }
        }
    }

    if !synthesize {
        return;
    }
    for (name, advice) in &table.members {
        if members.contains_key(name) {
            continue;
        }
        let Advice::Wrap(wrap) = advice else {
            continue;
        };
        // After-only advice has nothing to produce without a member.
        if wrap.before.is_none() {
            continue;
        }
        members.insert(name.clone(), wrap_member(name, None, wrap.clone()));
    }
}

/// Build the wrapped member.
pub(crate) fn wrap_member(name: &str, origin: Option<Callback>, wrap: AdviceWrap) -> Callback {
    let name = name.to_owned();
    Rc::new(move |rt, instance, args| {
        let mut live_args = args.to_vec();

        let mut result = match &wrap.before {
            Some(before) => match before(rt, instance, &mut live_args) {
                Ok(value) => value,
                Err(err) => {
                    advice_failed(rt, instance, &wrap, ErrorSource::AdviceBefore, &err, &name);
                    None
                }
            },
            None => None,
        };

        if let Some(origin) = &origin {
            match origin(rt, instance, &live_args) {
                Ok(value) => result = value,
                Err(err) => {
                    // The caller reports this failure; only the wrap's own
                    // error advice hears about it here.
                    if let Some(after) = wrap.after.clone() {
                        run_after(rt, instance, &wrap, after, result.as_ref(), &live_args, &name);
                    }
                    if let Some(on_error) = wrap.error.clone() {
                        on_error(rt, instance, &err, &name);
                    }
                    return Err(err);
                }
            }
        }

        if let Some(after) = wrap.after.clone() {
            result = run_after(rt, instance, &wrap, after, result.as_ref(), &live_args, &name);
        }
        Ok(result)
    })
}

fn run_after(
    rt: &mut Runtime,
    instance: &InstanceHandle,
    wrap: &AdviceWrap,
    after: AfterFn,
    result: Option<&Value>,
    args: &[Value],
    name: &str,
) -> Option<Value> {
    match after(rt, instance, result, args, name) {
        Ok(value) => value,
        Err(err) => {
            advice_failed(rt, instance, wrap, ErrorSource::AdviceAfter, &err, name);
            None
        }
    }
}

/// Advice failures never reach the member's caller.
fn advice_failed(
    rt: &mut Runtime,
    instance: &InstanceHandle,
    wrap: &AdviceWrap,
    source: ErrorSource,
    err: &anyhow::Error,
    name: &str,
) {
    match wrap.error.clone() {
        Some(on_error) => on_error(rt, instance, err, name),
        None => log_error(source, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scratch_instance, FakeHost};
    use serde_json::json;
    use std::cell::RefCell;

    fn fixture() -> (Runtime, InstanceHandle) {
        let mut rt = Runtime::new(FakeHost::new());
        let instance = scratch_instance(&mut rt);
        (rt, instance)
    }

    #[test]
    fn test_before_advice_rewrites_args() {
        let (mut rt, instance) = fixture();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_in_member = seen.clone();

        let member: Callback = Rc::new(move |_, _, args| {
            *seen_in_member.borrow_mut() = args.to_vec();
            Ok(None)
        });
        let wrapped = wrap_member(
            "handleTap",
            Some(member),
            AdviceWrap::before(|_, _, args| {
                args.clear();
                args.push(json!("rewritten"));
                Ok(None)
            }),
        );

        wrapped(&mut rt, &instance, &[json!("original")]).unwrap();
        assert_eq!(*seen.borrow(), vec![json!("rewritten")]);
    }

    #[test]
    fn test_before_failure_leaves_member_untouched() {
        let (mut rt, instance) = fixture();
        let ran = Rc::new(RefCell::new(false));
        let ran_in_member = ran.clone();

        let member: Callback = Rc::new(move |_, _, args| {
            *ran_in_member.borrow_mut() = true;
            assert_eq!(args, [json!(1)]);
            Ok(Some(json!("ok")))
        });
        let wrapped = wrap_member(
            "handleTap",
            Some(member),
            AdviceWrap::before(|_, _, _| anyhow::bail!("advice broke")),
        );

        let result = wrapped(&mut rt, &instance, &[json!(1)]).unwrap();
        assert!(*ran.borrow());
        assert_eq!(result, Some(json!("ok")));
    }

    #[test]
    fn test_after_advice_replaces_result() {
        let (mut rt, instance) = fixture();
        let member: Callback = Rc::new(|_, _, _| Ok(Some(json!(1))));
        let wrapped = wrap_member(
            "compute",
            Some(member),
            AdviceWrap::after(|_, _, result, _, name| {
                assert_eq!(result, Some(&json!(1)));
                assert_eq!(name, "compute");
                Ok(Some(json!(2)))
            }),
        );
        assert_eq!(wrapped(&mut rt, &instance, &[]).unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_after_failure_loses_result() {
        let (mut rt, instance) = fixture();
        let member: Callback = Rc::new(|_, _, _| Ok(Some(json!(1))));
        let wrapped = wrap_member(
            "compute",
            Some(member),
            AdviceWrap::after(|_, _, _, _, _| anyhow::bail!("after broke")),
        );
        assert_eq!(wrapped(&mut rt, &instance, &[]).unwrap(), None);
    }

    #[test]
    fn test_member_failure_still_runs_after_and_propagates() {
        let (mut rt, instance) = fixture();
        let after_ran = Rc::new(RefCell::new(false));
        let flag = after_ran.clone();

        let member: Callback = Rc::new(|_, _, _| anyhow::bail!("member broke"));
        let wrapped = wrap_member(
            "compute",
            Some(member),
            AdviceWrap::after(move |_, _, _, _, _| {
                *flag.borrow_mut() = true;
                Ok(None)
            }),
        );

        assert!(wrapped(&mut rt, &instance, &[]).is_err());
        assert!(*after_ran.borrow());
    }

    #[test]
    fn test_error_advice_hears_advice_and_member_failures() {
        let (mut rt, instance) = fixture();
        let heard = Rc::new(RefCell::new(Vec::new()));

        let sink = heard.clone();
        let wrap = AdviceWrap::before(|_, _, _| anyhow::bail!("before broke"))
            .with_error(move |_, _, err, name| {
                sink.borrow_mut().push(format!("{name}: {err}"));
            });
        let member: Callback = Rc::new(|_, _, _| anyhow::bail!("member broke"));
        let wrapped = wrap_member("handleTap", Some(member), wrap);

        assert!(wrapped(&mut rt, &instance, &[]).is_err());
        assert_eq!(
            *heard.borrow(),
            ["handleTap: before broke", "handleTap: member broke"]
        );
    }

    #[test]
    fn test_synthesized_member_needs_before() {
        let mut members: IndexMap<String, Callback> = IndexMap::new();
        let table = AdviceTable::new()
            .wrap("fromBefore", AdviceWrap::before(|_, _, _| Ok(Some(json!(7)))))
            .wrap("fromAfter", AdviceWrap::after(|_, _, _, _, _| Ok(None)));
        apply_table(&table, &mut members, true);

        assert!(members.contains_key("fromBefore"));
        assert!(!members.contains_key("fromAfter"));

        let (mut rt, instance) = fixture();
        let synthesized = members.get("fromBefore").unwrap().clone();
        assert_eq!(synthesized(&mut rt, &instance, &[]).unwrap(), Some(json!(7)));
    }

    #[test]
    fn test_private_tables_wrap_outside_global_ones() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut rt = Runtime::new(FakeHost::new());

        let global_log = order.clone();
        register_aop(
            &mut rt,
            InstanceKind::Component,
            AdviceTable::new().catch_all(AdviceWrap::before(move |_, _, _| {
                global_log.borrow_mut().push("global");
                Ok(None)
            })),
        );
        let private_log = order.clone();
        register_private_aop(
            &mut rt,
            InstanceKind::Component,
            AdviceTable::new().catch_all(AdviceWrap::before(move |_, _, _| {
                private_log.borrow_mut().push("private");
                Ok(None)
            })),
        );

        let member_log = order.clone();
        let mut members: IndexMap<String, Callback> = IndexMap::new();
        members.insert(
            "handleTap".into(),
            Rc::new(move |_, _, _| {
                member_log.borrow_mut().push("member");
                Ok(None)
            }),
        );
        apply_kind_aop(&mut rt, InstanceKind::Component, &mut members);

        let instance = scratch_instance(&mut rt);
        let wrapped = members.get("handleTap").unwrap().clone();
        wrapped(&mut rt, &instance, &[]).unwrap();
        assert_eq!(*order.borrow(), ["private", "global", "member"]);
    }

    #[test]
    fn test_setup_aop_wraps_callables_only_and_never_synthesizes() {
        let mut rt = Runtime::new(FakeHost::new());
        register_aop(
            &mut rt,
            InstanceKind::Page,
            AdviceTable::new()
                .wrap("absent", AdviceWrap::before(|_, _, _| Ok(Some(json!(1)))))
                .catch_all(AdviceWrap::after(|_, _, _, _, _| Ok(Some(json!("advised"))))),
        );

        let mut bindings: IndexMap<String, Binding> = IndexMap::new();
        bindings.insert("label".into(), Binding::Value(json!("plain")));
        bindings.insert(
            "pick".into(),
            Binding::method(|_, _, _| Ok(Some(json!("raw")))),
        );
        apply_setup_aop(&mut rt, InstanceKind::Page, &mut bindings);

        assert!(!bindings.contains_key("absent"));
        assert!(matches!(
            bindings.get("label"),
            Some(Binding::Value(value)) if value == &json!("plain")
        ));

        let instance = scratch_instance(&mut rt);
        let Some(Binding::Method(pick)) = bindings.get("pick").cloned() else {
            panic!("pick must stay callable");
        };
        assert_eq!(pick(&mut rt, &instance, &[]).unwrap(), Some(json!("advised")));
    }

    #[test]
    fn test_untouched_member_dodges_catch_all() {
        let wrapped_calls = Rc::new(RefCell::new(0));
        let counter = wrapped_calls.clone();

        let mut members: IndexMap<String, Callback> = IndexMap::new();
        members.insert("shielded".into(), Rc::new(|_, _, _| Ok(Some(json!("raw")))));
        members.insert("open".into(), Rc::new(|_, _, _| Ok(Some(json!("raw")))));

        let table = AdviceTable::new().untouched("shielded").catch_all(
            AdviceWrap::after(move |_, _, _, _, _| {
                *counter.borrow_mut() += 1;
                Ok(Some(json!("advised")))
            }),
        );
        apply_table(&table, &mut members, true);

        let (mut rt, instance) = fixture();
        let shielded = members.get("shielded").unwrap().clone();
        let open = members.get("open").unwrap().clone();
        assert_eq!(shielded(&mut rt, &instance, &[]).unwrap(), Some(json!("raw")));
        assert_eq!(open(&mut rt, &instance, &[]).unwrap(), Some(json!("advised")));
        assert_eq!(*wrapped_calls.borrow(), 1);
    }
}
