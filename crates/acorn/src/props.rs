//! Prop declaration, intake and update merging.
//!
//! Declarations are normalized once per definition: keys camelized,
//! shorthand forms expanded, boolean-cast flags computed. Intake stores
//! only declared keys; absent keys fall back to their declared default,
//! and Boolean declarations get the attribute casts. Updates merge
//! member-by-member for props opted into deep change, and replace the
//! value otherwise.

use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::instance::InstanceHandle;
use crate::runtime::Runtime;
use crate::template::COMPILE_PROP_KEYS;
use crate::util::{camelize, has_changed, hyphenate, value_kind};
use crate::warning::warn;

/// Declared value shape of a prop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Null,
    Any,
}

impl PropType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            PropType::String => value.is_string(),
            PropType::Number => value.is_number(),
            PropType::Boolean => value.is_boolean(),
            PropType::Object => value.is_object(),
            PropType::Array => value.is_array(),
            PropType::Null => value.is_null(),
            PropType::Any => true,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            PropType::String => "String",
            PropType::Number => "Number",
            PropType::Boolean => "Boolean",
            PropType::Object => "Object",
            PropType::Array => "Array",
            PropType::Null => "Null",
            PropType::Any => "Any",
        }
    }
}

/// Default for an optional prop: a literal or a per-use factory.
#[derive(Clone)]
pub enum PropDefault {
    Value(Value),
    Factory(Rc<dyn Fn(&mut Runtime) -> Value>),
}

pub type PropValidatorFn = Rc<dyn Fn(&Value) -> bool>;

/// One full prop declaration.
#[derive(Clone, Default)]
pub struct PropOptions {
    pub types: Vec<PropType>,
    pub required: bool,
    pub default: Option<PropDefault>,
    pub validator: Option<PropValidatorFn>,
}

impl PropOptions {
    pub fn of_type(ty: PropType) -> Self {
        Self {
            types: vec![ty],
            ..Self::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(PropDefault::Value(value));
        self
    }

    pub fn default_factory(mut self, f: impl Fn(&mut Runtime) -> Value + 'static) -> Self {
        self.default = Some(PropDefault::Factory(Rc::new(f)));
        self
    }

    pub fn validator(mut self, f: impl Fn(&Value) -> bool + 'static) -> Self {
        self.validator = Some(Rc::new(f));
        self
    }
}

/// Raw prop declarations as written in the definition.
#[derive(Clone)]
pub enum PropsOptions {
    /// `props: ["label", "count"]`
    Names(Vec<String>),
    /// Full per-prop declarations.
    Map(IndexMap<String, PropDecl>),
}

#[derive(Clone)]
pub enum PropDecl {
    Type(PropType),
    Types(Vec<PropType>),
    Options(PropOptions),
}

/// One normalized declaration.
#[derive(Clone)]
pub struct NormalizedProp {
    pub types: Vec<PropType>,
    pub required: bool,
    pub default: Option<PropDefault>,
    pub validator: Option<PropValidatorFn>,
    /// Declares Boolean: empty-string and absent casts would apply.
    pub should_cast: bool,
    /// Boolean wins over String for the empty-attribute cast.
    pub should_cast_true: bool,
}

/// Normalized declarations for one definition.
#[derive(Default)]
pub struct NormalizedProps {
    pub decls: IndexMap<String, NormalizedProp>,
    /// Keys whose values would need boolean or default casting. Computed
    /// for declaration sanity; intake stores host values untouched.
    pub need_cast_keys: Vec<String>,
}

impl NormalizedProps {
    pub fn has(&self, key: &str) -> bool {
        self.decls.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

fn empty_decl() -> NormalizedProp {
    NormalizedProp {
        types: Vec::new(),
        required: false,
        default: None,
        validator: None,
        should_cast: false,
        should_cast_true: true,
    }
}

fn normalize_one(options: PropOptions) -> NormalizedProp {
    let bool_index = options.types.iter().position(|t| *t == PropType::Boolean);
    let string_index = options.types.iter().position(|t| *t == PropType::String);
    let should_cast = bool_index.is_some();
    let should_cast_true = match (bool_index, string_index) {
        (_, None) => true,
        (Some(b), Some(s)) => b < s,
        (None, Some(_)) => true,
    };
    NormalizedProp {
        types: options.types,
        required: options.required,
        default: options.default,
        validator: options.validator,
        should_cast,
        should_cast_true,
    }
}

/// Normalize raw declarations; the reserved compile-help props are
/// seeded so the view layer can always pass them.
pub(crate) fn normalize_props_options(
    rt: &mut Runtime,
    options: Option<PropsOptions>,
) -> NormalizedProps {
    let mut decls: IndexMap<String, NormalizedProp> = IndexMap::new();
    for key in COMPILE_PROP_KEYS {
        decls.insert((*key).to_owned(), empty_decl());
    }

    let mut need_cast_keys = Vec::new();
    match options {
        None => {}
        Some(PropsOptions::Names(names)) => {
            for name in names {
                let key = camelize(&name);
                if key.starts_with('$') {
                    warn(rt, &format!("Invalid prop name: \"{key}\" is a reserved property."));
                    continue;
                }
                decls.insert(key, empty_decl());
            }
        }
        Some(PropsOptions::Map(map)) => {
            for (name, decl) in map {
                let key = camelize(&name);
                if key.starts_with('$') {
                    warn(rt, &format!("Invalid prop name: \"{key}\" is a reserved property."));
                    continue;
                }
                let normalized = match decl {
                    PropDecl::Type(ty) => normalize_one(PropOptions::of_type(ty)),
                    PropDecl::Types(types) => normalize_one(PropOptions {
                        types,
                        ..PropOptions::default()
                    }),
                    PropDecl::Options(options) => normalize_one(options),
                };
                if normalized.should_cast || normalized.default.is_some() {
                    need_cast_keys.push(key.clone());
                }
                decls.insert(key, normalized);
            }
        }
    }

    NormalizedProps {
        decls,
        need_cast_keys,
    }
}

/// Take the raw props the host passed at attach time. Only declared keys
/// are stored; declared defaults fill absent keys, and Boolean
/// declarations get the attribute casts.
pub(crate) fn init_props(rt: &mut Runtime, instance: &InstanceHandle, raw: &Map<String, Value>) {
    let options = instance.borrow().options();
    for (raw_key, value) in raw {
        let key = camelize(raw_key);
        if !options.props.has(&key) {
            continue;
        }
        instance.borrow_mut().props.insert(key, value.clone());
    }
    for key in &options.props.need_cast_keys {
        if let Some(value) = resolve_prop_value(rt, instance, key) {
            instance.borrow_mut().props.insert(key.clone(), value);
        }
    }
    validate_props(rt, instance, raw);
}

/// Defaults and boolean casts for one declared key after intake. `None`
/// means the stored value stands as is.
fn resolve_prop_value(rt: &mut Runtime, instance: &InstanceHandle, key: &str) -> Option<Value> {
    let options = instance.borrow().options();
    let decl = options.props.decls.get(key)?;
    let mut value = instance.borrow().props.get(key).cloned();
    let absent = value.is_none();

    if absent && decl.default.is_some() {
        value = default_prop_value(rt, instance, key);
    }
    if decl.should_cast {
        if absent && decl.default.is_none() {
            value = Some(Value::Bool(false));
        } else if decl.should_cast_true {
            let empty_attribute = value
                .as_ref()
                .and_then(Value::as_str)
                .is_some_and(|s| s.is_empty() || s == hyphenate(key));
            if empty_attribute {
                value = Some(Value::Bool(true));
            }
        }
    }
    value
}

/// Declaration checks: required presence, declared types, custom
/// validators. Failures warn and never block intake.
pub(crate) fn validate_props(rt: &mut Runtime, instance: &InstanceHandle, raw: &Map<String, Value>) {
    let options = instance.borrow().options();
    for (key, decl) in &options.props.decls {
        let value = instance.borrow().props.get(key).cloned();
        let absent = value.is_none()
            && !raw.contains_key(key)
            && !raw.contains_key(&hyphenate(key));

        if decl.required && absent {
            warn(rt, &format!("Missing required prop: \"{key}\""));
            continue;
        }
        let Some(value) = value else {
            continue;
        };
        if value.is_null() && !decl.required {
            continue;
        }
        if !decl.types.is_empty() && !decl.types.iter().any(|t| t.matches(&value)) {
            let expected = decl
                .types
                .iter()
                .map(PropType::label)
                .collect::<Vec<_>>()
                .join(" | ");
            warn(
                rt,
                &format!("Invalid prop: type check failed for prop \"{key}\". Expected {expected}."),
            );
            continue;
        }
        if let Some(validator) = &decl.validator {
            if !validator(&value) {
                warn(
                    rt,
                    &format!("Invalid prop: custom validator check failed for prop \"{key}\"."),
                );
            }
        }
    }
}

/// Resolve the declared default of `key`, if any.
pub fn default_prop_value(rt: &mut Runtime, instance: &InstanceHandle, key: &str) -> Option<Value> {
    let options = instance.borrow().options();
    let decl = options.props.decls.get(key)?;
    match decl.default.as_ref()? {
        PropDefault::Value(value) => Some(value.clone()),
        PropDefault::Factory(f) => Some(f(rt)),
    }
}

/// Host-driven update of a declared prop. Returns whether anything
/// changed.
pub(crate) fn update_prop(instance: &InstanceHandle, key: &str, value: &Value) -> bool {
    let key = camelize(key);
    let options = instance.borrow().options();
    if !options.props.has(&key) {
        return false;
    }
    let deep = options.deep_change_props.contains(&key);

    let mut i = instance.borrow_mut();
    match i.props.get_mut(&key) {
        Some(slot) => set_prop_value(slot, value, deep, true),
        None => {
            i.props.insert(key, value.clone());
            true
        }
    }
}

/// Merge a new prop value into its slot. Deep props patch arrays and
/// objects member-by-member so views watching sub-paths keep their
/// identity; everything else replaces the slot.
pub(crate) fn set_prop_value(target: &mut Value, new_value: &Value, deep: bool, is_root: bool) -> bool {
    if is_root && !deep {
        let changed = has_changed(new_value, target);
        *target = new_value.clone();
        return changed;
    }

    if value_kind(new_value) != value_kind(target) {
        *target = new_value.clone();
        return true;
    }

    match (new_value, target) {
        (Value::Array(new), Value::Array(old)) => {
            let mut changed = false;
            if new.len() < old.len() {
                old.truncate(new.len());
                changed = true;
            }
            for (index, item) in new.iter().enumerate() {
                match old.get_mut(index) {
                    Some(slot) => {
                        if set_prop_value(slot, item, deep, false) {
                            changed = true;
                        }
                    }
                    None => {
                        old.push(item.clone());
                        changed = true;
                    }
                }
            }
            changed
        }
        (Value::Object(new), Value::Object(old)) => {
            let mut changed = false;
            let stale: Vec<String> = old
                .keys()
                .filter(|k| !new.contains_key(*k))
                .cloned()
                .collect();
            for key in stale {
                old.shift_remove(&key);
                changed = true;
            }
            for (key, item) in new {
                match old.get_mut(key) {
                    Some(slot) => {
                        if set_prop_value(slot, item, deep, false) {
                            changed = true;
                        }
                    }
                    None => {
                        old.insert(key.clone(), item.clone());
                        changed = true;
                    }
                }
            }
            changed
        }
        (new_value, target) => {
            if new_value != target {
                *target = new_value.clone();
                return true;
            }
            false
        }
    }
}
