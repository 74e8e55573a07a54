//! Component descriptors.
//!
//! A component is described by [`ComponentOptions`], built with chained
//! setters, and frozen into a [`ComponentDef`] by [`ComponentOptions::build`].
//! Mixins and `extends` are merged into the definition at build time so an
//! instance only ever sees one flat descriptor (plus global mixins, merged
//! when the instance is created).
//!
//! # Merge rules
//!
//! | option | rule |
//! |--------|------|
//! | lifecycle hooks, `error_captured` | concatenate, parent first, identical hooks once |
//! | `data`, `provide` | both run, child keys win, nested objects merge |
//! | `watch` | concatenate per key |
//! | `props`, `methods`, `computed`, `inject`, `components`, `directives` | child entries override |
//! | `name`, `render`, `render_error` | child wins when set |
//! | `is_abstract` | either side |
//! | `inherit_attrs` | both sides must allow it |

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::instance::Instance;
use super::render::{CreateElement, Rendered};
use crate::error::{Error, Result};
use crate::observer::{ReactiveObject, Value};
use crate::vdom::{DirectiveDef, NodeId};

// =============================================================================
// Callback types
// =============================================================================

pub type HookFn = Rc<dyn Fn(&Instance) -> Result<()>>;
pub type DataFn = Rc<dyn Fn(&Instance) -> Result<ReactiveObject>>;
pub type RenderFn = Rc<dyn Fn(&CreateElement<'_>) -> Result<Rendered>>;
pub type RenderErrorFn = Rc<dyn Fn(&CreateElement<'_>, &Error) -> Result<Rendered>>;
pub type MethodFn = Rc<dyn Fn(&Instance, &[Value]) -> Result<Value>>;
pub type ComputedGetter = Rc<dyn Fn(&Instance) -> Result<Value>>;
pub type ComputedSetter = Rc<dyn Fn(&Instance, Value) -> Result<()>>;
pub type WatchHandler = Rc<dyn Fn(&Instance, &Value, &Value) -> Result<()>>;
pub type ProvideFn = Rc<dyn Fn(&Instance) -> Result<IndexMap<String, Value>>>;
pub type PropValidator = Rc<dyn Fn(&Value) -> bool>;
pub type DefaultFactory = Rc<dyn Fn(&Instance) -> Value>;

/// `(capturing instance, error, source instance, info)`; `Ok(true)` stops
/// propagation.
pub type ErrorCapturedFn = Rc<dyn Fn(&Instance, &Error, &Instance, &str) -> Result<bool>>;

// =============================================================================
// Lifecycle hooks
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleHook {
    BeforeCreate,
    Created,
    BeforeMount,
    Mounted,
    BeforeUpdate,
    Updated,
    Activated,
    Deactivated,
    BeforeDestroy,
    Destroyed,
}

impl LifecycleHook {
    pub const ALL: [LifecycleHook; 10] = [
        LifecycleHook::BeforeCreate,
        LifecycleHook::Created,
        LifecycleHook::BeforeMount,
        LifecycleHook::Mounted,
        LifecycleHook::BeforeUpdate,
        LifecycleHook::Updated,
        LifecycleHook::Activated,
        LifecycleHook::Deactivated,
        LifecycleHook::BeforeDestroy,
        LifecycleHook::Destroyed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleHook::BeforeCreate => "beforeCreate",
            LifecycleHook::Created => "created",
            LifecycleHook::BeforeMount => "beforeMount",
            LifecycleHook::Mounted => "mounted",
            LifecycleHook::BeforeUpdate => "beforeUpdate",
            LifecycleHook::Updated => "updated",
            LifecycleHook::Activated => "activated",
            LifecycleHook::Deactivated => "deactivated",
            LifecycleHook::BeforeDestroy => "beforeDestroy",
            LifecycleHook::Destroyed => "destroyed",
        }
    }

    /// Name of the event emitted alongside the hook.
    pub fn event_name(self) -> String {
        format!("hook:{}", self.as_str())
    }
}

// =============================================================================
// Props
// =============================================================================

/// Runtime type a prop accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropType {
    Any,
    Bool,
    Number,
    String,
    Object,
    Array,
    VNode,
}

impl PropType {
    pub fn matches(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (PropType::Any, _)
                | (PropType::Bool, Value::Bool(_))
                | (PropType::Number, Value::Number(_))
                | (PropType::String, Value::Str(_))
                | (PropType::Object, Value::Object(_))
                | (PropType::Array, Value::Array(_))
                | (PropType::VNode, Value::VNode(_))
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            PropType::Any => "Any",
            PropType::Bool => "Boolean",
            PropType::Number => "Number",
            PropType::String => "String",
            PropType::Object => "Object",
            PropType::Array => "Array",
            PropType::VNode => "VNode",
        }
    }
}

/// Default for a prop or injection.
#[derive(Clone)]
pub enum DefaultValue {
    Value(Value),
    /// Evaluated per instance; use for objects and arrays so instances don't
    /// share one container.
    Factory(DefaultFactory),
}

#[derive(Clone, Default)]
pub struct PropDef {
    pub types: Vec<PropType>,
    pub required: bool,
    pub default: Option<DefaultValue>,
    pub validator: Option<PropValidator>,
}

impl PropDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(mut self, ty: PropType) -> Self {
        self.types.push(ty);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Value(value.into()));
        self
    }

    pub fn default_with(mut self, factory: impl Fn(&Instance) -> Value + 'static) -> Self {
        self.default = Some(DefaultValue::Factory(Rc::new(factory)));
        self
    }

    pub fn validator(mut self, f: impl Fn(&Value) -> bool + 'static) -> Self {
        self.validator = Some(Rc::new(f));
        self
    }

    pub(crate) fn accepts(&self, ty: PropType) -> Option<usize> {
        self.types.iter().position(|t| *t == ty)
    }
}

// =============================================================================
// Computed, watch, inject
// =============================================================================

#[derive(Clone)]
pub struct ComputedDef {
    pub get: ComputedGetter,
    pub set: Option<ComputedSetter>,
    /// Cached computeds are lazy units; uncached ones run the getter on
    /// every read.
    pub cache: bool,
}

#[derive(Clone)]
pub struct WatchDef {
    pub handler: WatchHandler,
    pub deep: bool,
    pub immediate: bool,
    pub sync: bool,
}

impl WatchDef {
    pub fn new(handler: impl Fn(&Instance, &Value, &Value) -> Result<()> + 'static) -> Self {
        Self {
            handler: Rc::new(handler),
            deep: false,
            immediate: false,
            sync: false,
        }
    }

    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }
}

#[derive(Clone)]
pub struct InjectDef {
    /// Provide key to look up in ancestors.
    pub from: String,
    pub default: Option<DefaultValue>,
}

// =============================================================================
// ComponentOptions
// =============================================================================

#[derive(Clone)]
pub struct ComponentOptions {
    pub name: Option<String>,
    pub data: Option<DataFn>,
    pub props: IndexMap<String, PropDef>,
    pub computed: IndexMap<String, ComputedDef>,
    pub methods: IndexMap<String, MethodFn>,
    pub watch: IndexMap<String, Vec<WatchDef>>,
    pub hooks: HashMap<LifecycleHook, Vec<HookFn>>,
    pub error_captured: Vec<ErrorCapturedFn>,
    pub render: Option<RenderFn>,
    pub render_error: Option<RenderErrorFn>,
    pub provide: Option<ProvideFn>,
    pub inject: IndexMap<String, InjectDef>,
    pub components: IndexMap<String, ComponentDef>,
    pub directives: IndexMap<String, DirectiveDef>,
    pub mixins: Vec<ComponentOptions>,
    pub extends: Option<Box<ComponentOptions>>,
    /// Abstract components (keep-alive) are skipped in the parent chain.
    pub is_abstract: bool,
    /// Whether non-prop attributes fall through to the root element.
    pub inherit_attrs: bool,
    /// Mount target for a root instance; it is mounted right after `created`.
    pub el: Option<NodeId>,
}

impl Default for ComponentOptions {
    fn default() -> Self {
        Self {
            name: None,
            data: None,
            props: IndexMap::new(),
            computed: IndexMap::new(),
            methods: IndexMap::new(),
            watch: IndexMap::new(),
            hooks: HashMap::new(),
            error_captured: Vec::new(),
            render: None,
            render_error: None,
            provide: None,
            inject: IndexMap::new(),
            components: IndexMap::new(),
            directives: IndexMap::new(),
            mixins: Vec::new(),
            extends: None,
            is_abstract: false,
            inherit_attrs: true,
            el: None,
        }
    }
}

impl ComponentOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Factory for the instance's root data.
    pub fn data(mut self, f: impl Fn(&Instance) -> Result<ReactiveObject> + 'static) -> Self {
        self.data = Some(Rc::new(f));
        self
    }

    pub fn prop(mut self, name: impl Into<String>, def: PropDef) -> Self {
        self.props.insert(name.into(), def);
        self
    }

    pub fn computed(mut self, name: impl Into<String>, get: impl Fn(&Instance) -> Result<Value> + 'static) -> Self {
        self.computed.insert(
            name.into(),
            ComputedDef {
                get: Rc::new(get),
                set: None,
                cache: true,
            },
        );
        self
    }

    pub fn computed_def(mut self, name: impl Into<String>, def: ComputedDef) -> Self {
        self.computed.insert(name.into(), def);
        self
    }

    pub fn method(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Instance, &[Value]) -> Result<Value> + 'static,
    ) -> Self {
        self.methods.insert(name.into(), Rc::new(f));
        self
    }

    /// Watch a key path of the instance.
    pub fn watch(
        self,
        path: impl Into<String>,
        handler: impl Fn(&Instance, &Value, &Value) -> Result<()> + 'static,
    ) -> Self {
        self.watch_def(path, WatchDef::new(handler))
    }

    pub fn watch_def(mut self, path: impl Into<String>, def: WatchDef) -> Self {
        self.watch.entry(path.into()).or_default().push(def);
        self
    }

    pub fn hook(mut self, hook: LifecycleHook, f: impl Fn(&Instance) -> Result<()> + 'static) -> Self {
        self.hooks.entry(hook).or_default().push(Rc::new(f));
        self
    }

    pub fn before_create(self, f: impl Fn(&Instance) -> Result<()> + 'static) -> Self {
        self.hook(LifecycleHook::BeforeCreate, f)
    }

    pub fn created(self, f: impl Fn(&Instance) -> Result<()> + 'static) -> Self {
        self.hook(LifecycleHook::Created, f)
    }

    pub fn before_mount(self, f: impl Fn(&Instance) -> Result<()> + 'static) -> Self {
        self.hook(LifecycleHook::BeforeMount, f)
    }

    pub fn mounted(self, f: impl Fn(&Instance) -> Result<()> + 'static) -> Self {
        self.hook(LifecycleHook::Mounted, f)
    }

    pub fn before_update(self, f: impl Fn(&Instance) -> Result<()> + 'static) -> Self {
        self.hook(LifecycleHook::BeforeUpdate, f)
    }

    pub fn updated(self, f: impl Fn(&Instance) -> Result<()> + 'static) -> Self {
        self.hook(LifecycleHook::Updated, f)
    }

    pub fn activated(self, f: impl Fn(&Instance) -> Result<()> + 'static) -> Self {
        self.hook(LifecycleHook::Activated, f)
    }

    pub fn deactivated(self, f: impl Fn(&Instance) -> Result<()> + 'static) -> Self {
        self.hook(LifecycleHook::Deactivated, f)
    }

    pub fn before_destroy(self, f: impl Fn(&Instance) -> Result<()> + 'static) -> Self {
        self.hook(LifecycleHook::BeforeDestroy, f)
    }

    pub fn destroyed(self, f: impl Fn(&Instance) -> Result<()> + 'static) -> Self {
        self.hook(LifecycleHook::Destroyed, f)
    }

    pub fn error_captured(
        mut self,
        f: impl Fn(&Instance, &Error, &Instance, &str) -> Result<bool> + 'static,
    ) -> Self {
        self.error_captured.push(Rc::new(f));
        self
    }

    pub fn render(mut self, f: impl Fn(&CreateElement<'_>) -> Result<Rendered> + 'static) -> Self {
        self.render = Some(Rc::new(f));
        self
    }

    /// Fallback render used when `render` fails.
    pub fn render_error(mut self, f: impl Fn(&CreateElement<'_>, &Error) -> Result<Rendered> + 'static) -> Self {
        self.render_error = Some(Rc::new(f));
        self
    }

    pub fn provide(mut self, f: impl Fn(&Instance) -> Result<IndexMap<String, Value>> + 'static) -> Self {
        self.provide = Some(Rc::new(f));
        self
    }

    /// Inject `key` from the nearest ancestor providing it.
    pub fn inject(self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.inject_def(
            key.clone(),
            InjectDef {
                from: key,
                default: None,
            },
        )
    }

    pub fn inject_def(mut self, key: impl Into<String>, def: InjectDef) -> Self {
        self.inject.insert(key.into(), def);
        self
    }

    pub fn component(mut self, name: impl Into<String>, def: &ComponentDef) -> Self {
        self.components.insert(name.into(), def.clone());
        self
    }

    pub fn directive(mut self, name: impl Into<String>, def: DirectiveDef) -> Self {
        self.directives.insert(name.into(), def);
        self
    }

    pub fn mixin(mut self, mixin: ComponentOptions) -> Self {
        self.mixins.push(mixin);
        self
    }

    pub fn extends(mut self, base: ComponentOptions) -> Self {
        self.extends = Some(Box::new(base));
        self
    }

    /// Mount onto `el` (replacing it) as soon as the instance is created.
    pub fn el(mut self, el: NodeId) -> Self {
        self.el = Some(el);
        self
    }

    pub fn abstract_component(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn inherit_attrs(mut self, inherit: bool) -> Self {
        self.inherit_attrs = inherit;
        self
    }

    /// Hooks registered for `hook`.
    pub fn hooks_for(&self, hook: LifecycleHook) -> &[HookFn] {
        self.hooks.get(&hook).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Flatten mixins and `extends` and assign a definition id.
    pub fn build(self) -> ComponentDef {
        let options = merge_options(&ComponentOptions::default(), &self);
        ComponentDef::from_flat(options)
    }
}

// =============================================================================
// ComponentDef
// =============================================================================

static NEXT_CID: AtomicU64 = AtomicU64::new(1);

struct DefInner {
    cid: u64,
    options: ComponentOptions,
}

/// A built component definition. Cheap to clone.
#[derive(Clone)]
pub struct ComponentDef {
    inner: Rc<DefInner>,
}

impl ComponentDef {
    fn from_flat(options: ComponentOptions) -> Self {
        Self {
            inner: Rc::new(DefInner {
                cid: NEXT_CID.fetch_add(1, Ordering::Relaxed),
                options,
            }),
        }
    }

    /// Definition id, unique per process.
    pub fn cid(&self) -> u64 {
        self.inner.cid
    }

    pub fn options(&self) -> &ComponentOptions {
        &self.inner.options
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.options.name.as_deref()
    }

    /// A new definition with `options` merged over this one.
    pub fn extend(&self, options: ComponentOptions) -> ComponentDef {
        ComponentDef::from_flat(merge_options(self.options(), &options))
    }

    pub fn ptr_eq(&self, other: &ComponentDef) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ComponentDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDef")
            .field("cid", &self.inner.cid)
            .field("name", &self.inner.options.name)
            .finish()
    }
}

// =============================================================================
// Merging
// =============================================================================

/// Merge `child` over `parent`, flattening the child's `extends` and mixins
/// first.
pub fn merge_options(parent: &ComponentOptions, child: &ComponentOptions) -> ComponentOptions {
    let mut base = parent.clone();
    if let Some(extends) = &child.extends {
        base = merge_options(&base, extends);
    }
    for mixin in &child.mixins {
        base = merge_options(&base, mixin);
    }

    let mut hooks = base.hooks.clone();
    for (hook, fns) in &child.hooks {
        let merged = hooks.entry(*hook).or_default();
        for f in fns {
            if !merged.iter().any(|existing| Rc::ptr_eq(existing, f)) {
                merged.push(f.clone());
            }
        }
    }

    let mut error_captured = base.error_captured.clone();
    for f in &child.error_captured {
        if !error_captured.iter().any(|existing| Rc::ptr_eq(existing, f)) {
            error_captured.push(f.clone());
        }
    }

    let mut watch = base.watch.clone();
    for (key, defs) in &child.watch {
        watch.entry(key.clone()).or_default().extend(defs.iter().cloned());
    }

    ComponentOptions {
        name: child.name.clone().or(base.name),
        data: merge_data_fn(base.data, child.data.clone()),
        props: extend_map(base.props, &child.props),
        computed: extend_map(base.computed, &child.computed),
        methods: extend_map(base.methods, &child.methods),
        watch,
        hooks,
        error_captured,
        render: child.render.clone().or(base.render),
        render_error: child.render_error.clone().or(base.render_error),
        provide: merge_provide_fn(base.provide, child.provide.clone()),
        inject: extend_map(base.inject, &child.inject),
        components: extend_map(base.components, &child.components),
        directives: extend_map(base.directives, &child.directives),
        mixins: Vec::new(),
        extends: None,
        is_abstract: base.is_abstract || child.is_abstract,
        inherit_attrs: base.inherit_attrs && child.inherit_attrs,
        el: child.el.or(base.el),
    }
}

fn extend_map<T: Clone>(mut base: IndexMap<String, T>, child: &IndexMap<String, T>) -> IndexMap<String, T> {
    for (key, value) in child {
        base.insert(key.clone(), value.clone());
    }
    base
}

fn merge_data_fn(parent: Option<DataFn>, child: Option<DataFn>) -> Option<DataFn> {
    match (parent, child) {
        (None, child) => child,
        (parent, None) => parent,
        (Some(parent), Some(child)) => Some(Rc::new(move |vm: &Instance| {
            let to = child(vm)?;
            let from = parent(vm)?;
            merge_data(&to, &from);
            Ok(to)
        })),
    }
}

fn merge_provide_fn(parent: Option<ProvideFn>, child: Option<ProvideFn>) -> Option<ProvideFn> {
    match (parent, child) {
        (None, child) => child,
        (parent, None) => parent,
        (Some(parent), Some(child)) => Some(Rc::new(move |vm: &Instance| {
            let mut merged = parent(vm)?;
            merged.extend(child(vm)?);
            Ok(merged)
        })),
    }
}

/// Copy keys of `from` missing in `to`; nested objects merge recursively.
fn merge_data(to: &ReactiveObject, from: &ReactiveObject) {
    for (key, from_value) in from.entries() {
        if !to.contains_key(&key) {
            to.assign(&key, from_value);
            continue;
        }
        if let (Value::Object(to_obj), Value::Object(from_obj)) = (to.peek(&key), &from_value) {
            if !to_obj.ptr_eq(from_obj) {
                merge_data(&to_obj, from_obj);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_hooks_concatenate_parent_first() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (a, b) = (log.clone(), log.clone());
        let mixin = ComponentOptions::new().created(move |_| {
            a.borrow_mut().push("mixin");
            Ok(())
        });
        let def = ComponentOptions::new()
            .mixin(mixin)
            .created(move |_| {
                b.borrow_mut().push("own");
                Ok(())
            })
            .build();

        assert_eq!(def.options().hooks_for(LifecycleHook::Created).len(), 2);
    }

    #[test]
    fn test_same_hook_merged_once() {
        let hook: HookFn = Rc::new(|_| Ok(()));
        let mut parent = ComponentOptions::new();
        parent.hooks.insert(LifecycleHook::Mounted, vec![hook.clone()]);
        let mut child = ComponentOptions::new();
        child.hooks.insert(LifecycleHook::Mounted, vec![hook]);

        let merged = merge_options(&parent, &child);
        assert_eq!(merged.hooks_for(LifecycleHook::Mounted).len(), 1);
    }

    #[test]
    fn test_child_overrides_methods_and_name() {
        let base = ComponentOptions::new()
            .name("base")
            .method("greet", |_, _| Ok(Value::from("base")))
            .method("only_base", |_, _| Ok(Value::Null));
        let def = ComponentOptions::new()
            .extends(base)
            .name("child")
            .method("greet", |_, _| Ok(Value::from("child")))
            .build();

        assert_eq!(def.name(), Some("child"));
        assert_eq!(def.options().methods.len(), 2);
        assert_eq!(def.options().methods.keys().next().map(String::as_str), Some("greet"));
    }

    #[test]
    fn test_watch_concatenates_per_key() {
        let def = ComponentOptions::new()
            .mixin(ComponentOptions::new().watch("a", |_, _, _| Ok(())))
            .watch("a", |_, _, _| Ok(()))
            .watch("b", |_, _, _| Ok(()))
            .build();
        assert_eq!(def.options().watch["a"].len(), 2);
        assert_eq!(def.options().watch["b"].len(), 1);
    }

    #[test]
    fn test_data_merge_keeps_child_values() {
        let to = ReactiveObject::new()
            .with("a", 1)
            .with("nested", ReactiveObject::new().with("x", 1));
        let from = ReactiveObject::new()
            .with("a", 2)
            .with("b", 3)
            .with("nested", ReactiveObject::new().with("x", 2).with("y", 2));
        merge_data(&to, &from);

        assert_eq!(to.peek("a"), Value::from(1));
        assert_eq!(to.peek("b"), Value::from(3));
        let nested = to.peek("nested");
        let nested = nested.as_object().unwrap();
        assert_eq!(nested.peek("x"), Value::from(1));
        assert_eq!(nested.peek("y"), Value::from(2));
    }

    #[test]
    fn test_flags_merge() {
        let def = ComponentOptions::new()
            .mixin(ComponentOptions::new().inherit_attrs(false))
            .build();
        assert!(!def.options().inherit_attrs);
        assert!(!def.options().is_abstract);

        let extended = def.extend(ComponentOptions::new().abstract_component());
        assert!(extended.options().is_abstract);
        assert_ne!(extended.cid(), def.cid());
    }

    #[test]
    fn test_prop_type_matching() {
        assert!(PropType::Number.matches(&Value::from(1)));
        assert!(!PropType::Number.matches(&Value::from("1")));
        assert!(PropType::Any.matches(&Value::Null));
    }
}
