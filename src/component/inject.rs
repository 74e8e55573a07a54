//! Provide / inject.
//!
//! `provide` is evaluated after an instance's state is initialised; `inject`
//! resolves each key by walking up the parent chain to the nearest provider.
//! Injected values are tracked but not deeply observed, same as props
//! passed from a parent.

use indexmap::IndexMap;

use super::instance::Instance;
use super::options::{DefaultValue, InjectDef};
use crate::error::{dev_warn, handle_error};
use crate::observer::{Value, define_reactive, toggle_observing, untracked};

pub(crate) fn init_injections(vm: &Instance) {
    let result = resolve_inject(&vm.options().inject, vm);
    if result.is_empty() {
        return;
    }
    toggle_observing(false);
    let injected = vm.injected();
    for (key, value) in result {
        define_reactive(&injected, &key, value);
    }
    toggle_observing(true);
}

pub(crate) fn init_provide(vm: &Instance) {
    let Some(provide) = vm.options().provide.clone() else { return };
    match untracked(|| provide(vm)) {
        Ok(provided) => vm.set_provided(provided),
        Err(err) => handle_error(&err, Some(vm), "provide()"),
    }
}

/// Look up every declared injection from `vm` upwards.
pub(crate) fn resolve_inject(inject: &IndexMap<String, InjectDef>, vm: &Instance) -> IndexMap<String, Value> {
    let mut result = IndexMap::new();
    for (key, def) in inject {
        // The instance's own provide isn't set yet, so starting at `vm`
        // effectively starts at its parent.
        let mut source = Some(vm.clone());
        let mut found = None;
        while let Some(current) = source {
            if let Some(value) = current.provided(&def.from) {
                found = Some(value);
                break;
            }
            source = current.parent();
        }

        let value = match (found, &def.default) {
            (Some(value), _) => value,
            (None, Some(DefaultValue::Value(value))) => value.clone(),
            (None, Some(DefaultValue::Factory(factory))) => factory(vm),
            (None, None) => {
                dev_warn(&format!("Injection \"{key}\" not found"), Some(vm));
                continue;
            }
        };
        result.insert(key.clone(), value);
    }
    result
}
