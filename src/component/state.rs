//! Instance state: props, methods, data, computed and watchers.
//!
//! Reads go through [`Instance::get`], which looks a key up in computed,
//! props, data and injections, in that order. Writes go through
//! [`Instance::assign`].

use std::rc::Rc;

use indexmap::IndexMap;

use super::instance::Instance;
use super::options::{DefaultValue, PropDef, PropType, WatchHandler};
use crate::error::{Error, Result, dev_warn, handle_error, invoke_with_error_handling, warn};
use crate::observer::{
    ReactiveObject, Value, Watcher, WatcherCallback, WatcherFlags, WatcherOptions, define_reactive, has_target,
    observe, should_observe, toggle_observing, untracked,
};
use crate::vdom::create_component::hyphenate;

pub(crate) fn init_state(vm: &Instance, props_data: &IndexMap<String, Value>) -> Result<()> {
    init_props(vm, props_data);
    init_methods(vm);
    init_data(vm);
    init_computed(vm)?;
    init_watch(vm)?;
    Ok(())
}

// =============================================================================
// Props
// =============================================================================

fn init_props(vm: &Instance, props_data: &IndexMap<String, Value>) {
    let props = vm.options().props.clone();
    if props.is_empty() {
        return;
    }
    // Values owned by the parent are already observed (or meant not to be).
    let is_root = vm.parent().is_none();
    if !is_root {
        toggle_observing(false);
    }
    for key in props.keys() {
        let value = validate_prop(key, &props, props_data, vm);
        define_reactive(&vm.props(), key, value);
    }
    toggle_observing(true);
}

/// Resolve the value of prop `key` from raw `props_data`: boolean casting,
/// defaults and validation.
pub(crate) fn validate_prop(
    key: &str,
    props: &IndexMap<String, PropDef>,
    props_data: &IndexMap<String, Value>,
    vm: &Instance,
) -> Value {
    let Some(prop) = props.get(key) else {
        return Value::Undefined;
    };
    let absent = !props_data.contains_key(key);
    let mut value = props_data.get(key).cloned().unwrap_or_default();

    if let Some(bool_index) = prop.accepts(PropType::Bool) {
        if absent && prop.default.is_none() {
            value = Value::Bool(false);
        } else if value.as_str().is_some_and(|s| s.is_empty() || s == hyphenate(key)) {
            // `<comp disabled>` and `<comp disabled="disabled">` mean true
            // unless String is the preferred type.
            let string_index = prop.accepts(PropType::String);
            if string_index.is_none_or(|si| bool_index < si) {
                value = Value::Bool(true);
            }
        }
    }

    if value.is_undefined() {
        value = prop_default_value(vm, prop, key, props_data);
        let previous = should_observe();
        toggle_observing(true);
        observe(&value, false);
        toggle_observing(previous);
    }

    assert_prop(prop, key, &value, vm, absent);
    value
}

fn prop_default_value(vm: &Instance, prop: &PropDef, key: &str, props_data: &IndexMap<String, Value>) -> Value {
    let Some(default) = &prop.default else {
        return Value::Undefined;
    };
    // Keep the previous default across re-renders so watchers don't fire.
    let current = vm.props().peek(key);
    if props_data.get(key).is_none_or(Value::is_undefined) && !current.is_undefined() {
        return current;
    }
    match default {
        DefaultValue::Value(value) => {
            if value.is_object() {
                dev_warn(
                    &format!(
                        "Invalid default value for prop \"{key}\": Props with type Object/Array must use a \
                         factory function to return the default value."
                    ),
                    Some(vm),
                );
            }
            value.clone()
        }
        DefaultValue::Factory(factory) => factory(vm),
    }
}

fn assert_prop(prop: &PropDef, key: &str, value: &Value, vm: &Instance, absent: bool) {
    if prop.required && absent {
        dev_warn(&format!("Missing required prop: \"{key}\""), Some(vm));
        return;
    }
    if value.is_nullish() && !prop.required {
        return;
    }
    let typed = !prop.types.is_empty() && !prop.types.contains(&PropType::Any);
    if typed && !prop.types.iter().any(|t| t.matches(value)) {
        let expected: Vec<&str> = prop.types.iter().map(|t| t.name()).collect();
        dev_warn(
            &format!(
                "Invalid prop: type check failed for prop \"{key}\". Expected {}, got {}",
                expected.join(", "),
                value.type_name()
            ),
            Some(vm),
        );
        return;
    }
    if let Some(validator) = &prop.validator {
        if !validator(value) {
            dev_warn(&format!("Invalid prop: custom validator check failed for prop \"{key}\"."), Some(vm));
        }
    }
}

// =============================================================================
// Methods, data
// =============================================================================

fn init_methods(vm: &Instance) {
    for key in vm.options().methods.keys() {
        if vm.options().props.contains_key(key) {
            dev_warn(&format!("Method \"{key}\" has already been defined as a prop."), Some(vm));
        }
    }
}

fn init_data(vm: &Instance) {
    let data = match vm.options().data.clone() {
        // Data factories run untracked so a parent render doesn't pick up
        // reads made while building child state.
        Some(factory) => match untracked(|| factory(vm)) {
            Ok(data) => data,
            Err(err) => {
                handle_error(&err, Some(vm), "data()");
                ReactiveObject::new()
            }
        },
        None => ReactiveObject::new(),
    };

    for key in data.keys() {
        if vm.options().methods.contains_key(&key) {
            dev_warn(&format!("Method \"{key}\" has already been defined as a data property."), Some(vm));
        }
        if vm.options().props.contains_key(&key) {
            dev_warn(
                &format!("The data property \"{key}\" is already declared as a prop. Use prop default value instead."),
                Some(vm),
            );
        }
    }

    observe(&Value::Object(data.clone()), true);
    *vm.inner_data_mut() = data;
}

// =============================================================================
// Computed
// =============================================================================

fn init_computed(vm: &Instance) -> Result<()> {
    let computed = vm.options().computed.clone();
    for (key, def) in computed {
        if vm.options().props.contains_key(&key) {
            dev_warn(&format!("The computed property \"{key}\" is already defined as a prop."), Some(vm));
        } else if vm.data().contains_key(&key) {
            dev_warn(&format!("The computed property \"{key}\" is already defined in data."), Some(vm));
        }
        if !def.cache {
            continue;
        }
        let weak = vm.downgrade();
        let get = def.get.clone();
        let getter = move || match Instance::upgrade(&weak) {
            Some(vm) => get(&vm),
            None => Ok(Value::Undefined),
        };
        let options = WatcherOptions {
            flags: WatcherFlags::LAZY,
            before: None,
            expression: Some(key.clone()),
        };
        let watcher = Watcher::new(Some(vm), getter, None, options)?;
        vm.computed_watchers().insert(key, watcher);
    }
    Ok(())
}

// =============================================================================
// Watch
// =============================================================================

fn init_watch(vm: &Instance) -> Result<()> {
    let watch = vm.options().watch.clone();
    for (path, defs) in watch {
        for def in defs {
            let options = WatchOptions {
                deep: def.deep,
                immediate: def.immediate,
                sync: def.sync,
            };
            vm.watch_with(WatchSource::Path(path.clone()), def.handler.clone(), options)?;
        }
    }
    Ok(())
}

/// What a user watcher observes.
#[derive(Clone)]
pub enum WatchSource {
    /// Dot-delimited key path from the instance, like `"user.name"`.
    Path(String),
    Getter(Rc<dyn Fn(&Instance) -> Result<Value>>),
}

impl From<&str> for WatchSource {
    fn from(path: &str) -> Self {
        WatchSource::Path(path.to_string())
    }
}

impl From<String> for WatchSource {
    fn from(path: String) -> Self {
        WatchSource::Path(path)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    pub deep: bool,
    /// Run the callback once right away with the current value.
    pub immediate: bool,
    /// Run on every notification instead of in the next flush.
    pub sync: bool,
}

/// Handle returned by [`Instance::watch`].
pub struct Unwatch {
    watcher: Watcher,
}

impl Unwatch {
    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    /// Stop watching.
    pub fn unwatch(self) {
        self.watcher.teardown();
    }
}

fn parse_path(path: &str) -> Option<Vec<String>> {
    let valid = |seg: &str| !seg.is_empty() && seg.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$');
    let segments: Vec<String> = path.split('.').map(str::to_string).collect();
    segments.iter().all(|s| valid(s)).then_some(segments)
}

fn read_path(vm: &Instance, segments: &[String]) -> Result<Value> {
    let Some((first, rest)) = segments.split_first() else {
        return Ok(Value::Undefined);
    };
    let mut value = vm.try_get(first)?;
    for segment in rest {
        value = match &value {
            Value::Object(obj) => obj.get(segment),
            Value::Array(arr) => match segment.parse::<usize>() {
                Ok(index) => arr.get(index),
                Err(_) => return Ok(Value::Undefined),
            },
            _ => return Ok(Value::Undefined),
        };
    }
    Ok(value)
}

// =============================================================================
// Instance API
// =============================================================================

impl Instance {
    /// Read a key (tracked when a unit is collecting).
    ///
    /// Computed getter errors are reported and read as `Undefined`.
    pub fn get(&self, key: &str) -> Value {
        self.try_get(key).unwrap_or_else(|err| {
            handle_error(&err, Some(self), &format!("computed property \"{key}\""));
            Value::Undefined
        })
    }

    /// Read a key, propagating computed getter errors.
    pub fn try_get(&self, key: &str) -> Result<Value> {
        if let Some(value) = self.computed_value(key)? {
            return Ok(value);
        }
        let props = self.props();
        if props.contains_key(key) {
            return Ok(props.get(key));
        }
        let data = self.data();
        if data.contains_key(key) {
            return Ok(data.get(key));
        }
        let injected = self.injected();
        if injected.contains_key(key) {
            return Ok(injected.get(key));
        }
        Ok(Value::Undefined)
    }

    fn computed_value(&self, key: &str) -> Result<Option<Value>> {
        let Some(def) = self.options().computed.get(key).cloned() else {
            return Ok(None);
        };
        let watcher = self.computed_watchers().get(key).cloned();
        match watcher {
            Some(watcher) => {
                if watcher.is_dirty() {
                    watcher.evaluate()?;
                }
                if has_target() {
                    watcher.depend();
                }
                Ok(Some(watcher.value()))
            }
            None => (def.get)(self).map(Some),
        }
    }

    /// Whether `key` names a computed, prop, data, injected key or method.
    pub fn has_key(&self, key: &str) -> bool {
        let options = self.options();
        options.computed.contains_key(key)
            || self.props().contains_key(key)
            || self.data().contains_key(key)
            || self.injected().contains_key(key)
            || options.methods.contains_key(key)
    }

    /// Write a key the way an assignment on the instance would.
    ///
    /// Computed keys go through their setter, props and injections warn
    /// (they are owned elsewhere) and everything else lands in root data.
    pub fn assign(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        if let Some(def) = self.options().computed.get(key).cloned() {
            match def.set {
                Some(set) => {
                    invoke_with_error_handling(|| set(self, value), Some(self), "computed setter");
                }
                None => dev_warn(
                    &format!("Computed property \"{key}\" was assigned to but it has no setter."),
                    Some(self),
                ),
            }
            return;
        }
        let props = self.props();
        if props.contains_key(key) {
            if !self.is_updating_props() {
                dev_warn(
                    &format!(
                        "Avoid mutating a prop directly since the value will be overwritten whenever the parent \
                         component re-renders. Prop being mutated: \"{key}\""
                    ),
                    Some(self),
                );
            }
            props.assign(key, value);
            return;
        }
        let injected = self.injected();
        if injected.contains_key(key) {
            dev_warn(
                &format!(
                    "Avoid mutating an injected value directly since the changes will be overwritten whenever \
                     the provided component re-renders. Injection being mutated: \"{key}\""
                ),
                Some(self),
            );
            injected.assign(key, value);
            return;
        }
        self.data().assign(key, value);
    }

    /// Call a method declared in `methods`.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        let method = self.options().methods.get(name).cloned();
        match method {
            Some(method) => method(self, args),
            None => Err(Error::UnknownMethod(name.to_string())),
        }
    }

    /// Watch a key path or getter; `callback(vm, new, old)` runs after the
    /// value changes.
    pub fn watch(
        &self,
        source: impl Into<WatchSource>,
        callback: impl Fn(&Instance, &Value, &Value) -> Result<()> + 'static,
        options: WatchOptions,
    ) -> Result<Unwatch> {
        self.watch_with(source.into(), Rc::new(callback), options)
    }

    pub(crate) fn watch_with(&self, source: WatchSource, callback: WatchHandler, options: WatchOptions) -> Result<Unwatch> {
        if self.is_destroyed() {
            return Err(Error::Destroyed(self.uid().0));
        }
        let weak = self.downgrade();
        let (expression, getter): (String, Box<dyn Fn() -> Result<Value>>) = match source {
            WatchSource::Path(path) => match parse_path(&path) {
                Some(segments) => {
                    let weak = weak.clone();
                    (
                        path,
                        Box::new(move || match Instance::upgrade(&weak) {
                            Some(vm) => read_path(&vm, &segments),
                            None => Ok(Value::Undefined),
                        }),
                    )
                }
                None => {
                    warn(
                        &format!(
                            "Failed watching path: \"{path}\" Watcher only accepts simple dot-delimited paths. \
                             For full control, use a function instead."
                        ),
                        Some(self),
                    );
                    (path, Box::new(|| Ok(Value::Undefined)))
                }
            },
            WatchSource::Getter(get) => {
                let weak = weak.clone();
                (
                    "getter".to_string(),
                    Box::new(move || match Instance::upgrade(&weak) {
                        Some(vm) => get(&vm),
                        None => Ok(Value::Undefined),
                    }),
                )
            }
        };

        let handler = callback.clone();
        let cb_weak = weak.clone();
        let on_change: WatcherCallback = Rc::new(move |new: &Value, old: &Value| match Instance::upgrade(&cb_weak) {
            Some(vm) => handler(&vm, new, old),
            None => Ok(()),
        });

        let mut flags = WatcherFlags::USER;
        flags.set(WatcherFlags::DEEP, options.deep);
        flags.set(WatcherFlags::SYNC, options.sync);
        let watcher = Watcher::new(
            Some(self),
            getter,
            Some(on_change),
            WatcherOptions {
                flags,
                before: None,
                expression: Some(expression.clone()),
            },
        )?;

        if options.immediate {
            let value = watcher.value();
            let info = format!("callback for immediate watcher \"{expression}\"");
            untracked(|| invoke_with_error_handling(|| callback(self, &value, &Value::Undefined), Some(self), &info));
        }
        Ok(Unwatch { watcher })
    }
}
