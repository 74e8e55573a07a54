//! Instance event bus.
//!
//! Every instance can `on`/`once`/`off`/`emit` named events. Listeners a
//! parent puts on a component placeholder (`VNodeData::on`) are attached
//! here, and swapped in place when the parent re-renders.
//!
//! Listener names may carry modifier prefixes, applied in this order:
//! `&` passive, `~` once, `!` capture.

use std::rc::Rc;

use indexmap::IndexMap;

use super::instance::Instance;
use crate::error::{Result, invoke_with_error_handling};
use crate::observer::Value;

/// An event listener.
pub type Handler = Rc<dyn Fn(&[Value]) -> Result<()>>;

/// An event name with its modifier prefixes stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub name: String,
    pub once: bool,
    pub capture: bool,
    pub passive: bool,
}

pub fn normalize_event(raw: &str) -> NormalizedEvent {
    let mut rest = raw;
    let passive = rest.starts_with('&');
    if passive {
        rest = &rest[1..];
    }
    let once = rest.starts_with('~');
    if once {
        rest = &rest[1..];
    }
    let capture = rest.starts_with('!');
    if capture {
        rest = &rest[1..];
    }
    NormalizedEvent {
        name: rest.to_string(),
        once,
        capture,
        passive,
    }
}

/// One registration on the bus.
#[derive(Clone)]
pub(crate) struct EventEntry {
    pub(crate) handler: Handler,
    /// For `once` wrappers, the handler the caller registered.
    pub(crate) original: Option<Handler>,
}

impl EventEntry {
    fn matches(&self, handler: &Handler) -> bool {
        Rc::ptr_eq(&self.handler, handler) || self.original.as_ref().is_some_and(|o| Rc::ptr_eq(o, handler))
    }
}

impl Instance {
    /// Listen for `event`. Returns the handler for a later [`off`](Self::off).
    pub fn on(&self, event: &str, handler: impl Fn(&[Value]) -> Result<()> + 'static) -> Handler {
        let handler: Handler = Rc::new(handler);
        self.on_handler(event, handler.clone());
        handler
    }

    pub fn on_handler(&self, event: &str, handler: Handler) {
        if event.starts_with("hook:") {
            self.mark_hook_event();
        }
        self.events_mut()
            .entry(event.to_string())
            .or_default()
            .push(EventEntry { handler, original: None });
    }

    /// Listen for the next `event` only.
    pub fn once(&self, event: &str, handler: impl Fn(&[Value]) -> Result<()> + 'static) -> Handler {
        let handler: Handler = Rc::new(handler);
        self.once_handler(event, handler.clone());
        handler
    }

    pub fn once_handler(&self, event: &str, handler: Handler) {
        if event.starts_with("hook:") {
            self.mark_hook_event();
        }
        let entry = once_entry(self, event, &handler);
        self.events_mut().entry(event.to_string()).or_default().push(entry);
    }

    /// Remove one handler from `event`.
    pub fn off(&self, event: &str, handler: &Handler) {
        let mut events = self.events_mut();
        if let Some(entries) = events.get_mut(event) {
            // Latest registration first.
            if let Some(pos) = entries.iter().rposition(|e| e.matches(handler)) {
                entries.remove(pos);
            }
        }
    }

    /// Remove every handler of `event`.
    pub fn off_event(&self, event: &str) {
        self.events_mut().shift_remove(event);
    }

    pub fn off_all(&self) {
        self.events_mut().clear();
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.events_ref().get(event).map_or(0, Vec::len)
    }

    /// Call every handler of `event` in registration order.
    ///
    /// Handler errors are reported through the error chain and don't stop
    /// the remaining handlers.
    pub fn emit(&self, event: &str, args: &[Value]) {
        let handlers: Vec<Handler> = self
            .events_ref()
            .get(event)
            .map(|entries| entries.iter().map(|e| e.handler.clone()).collect())
            .unwrap_or_default();
        if handlers.is_empty() {
            return;
        }
        let info = format!("event handler for \"{event}\"");
        for handler in handlers {
            invoke_with_error_handling(|| handler(args), Some(self), &info);
        }
    }
}

/// Reconcile the listeners a parent attached to `vm`'s placeholder.
///
/// Handlers registered from the placeholder are tracked separately from
/// `on` calls made by user code, so only they are swapped on re-render.
pub(crate) fn update_component_listeners(vm: &Instance, listeners: &IndexMap<String, Handler>) {
    let previous = vm.replace_parent_listeners(listeners.clone());
    for (raw, handler) in &previous {
        let still_bound = listeners.get(raw).is_some_and(|h| Rc::ptr_eq(h, handler));
        if !still_bound {
            let event = normalize_event(raw);
            vm.off(&event.name, handler);
        }
    }
    for (raw, handler) in listeners {
        let already = previous.get(raw).is_some_and(|h| Rc::ptr_eq(h, handler));
        if already {
            continue;
        }
        let event = normalize_event(raw);
        if event.once {
            vm.once_handler(&event.name, handler.clone());
        } else {
            vm.on_handler(&event.name, handler.clone());
        }
    }
}

fn once_entry(vm: &Instance, event: &str, handler: &Handler) -> EventEntry {
    let weak = vm.downgrade();
    let name = event.to_string();
    let target = handler.clone();
    EventEntry {
        handler: Rc::new(move |args: &[Value]| {
            if let Some(vm) = Instance::upgrade(&weak) {
                vm.off(&name, &target);
            }
            target(args)
        }),
        original: Some(handler.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentOptions;
    use crate::runtime::reset_runtime;
    use crate::vdom::{MemoryDom, Patcher};
    use std::cell::RefCell;

    fn instance() -> Instance {
        let def = ComponentOptions::new().build();
        Instance::new(&def, Patcher::new(MemoryDom::new())).unwrap()
    }

    #[test]
    fn test_normalize_event() {
        let e = normalize_event("&~!click");
        assert_eq!(e.name, "click");
        assert!(e.passive && e.once && e.capture);
        assert_eq!(normalize_event("input").name, "input");
    }

    #[test]
    fn test_emit_and_off() {
        reset_runtime();
        let vm = instance();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let h = vm.on("ping", move |args| {
            sink.borrow_mut().push(args[0].clone());
            Ok(())
        });

        vm.emit("ping", &[Value::from(1)]);
        vm.off("ping", &h);
        vm.emit("ping", &[Value::from(2)]);

        assert_eq!(*seen.borrow(), vec![Value::from(1)]);
    }

    #[test]
    fn test_once_fires_once_and_can_be_removed_early() {
        reset_runtime();
        let vm = instance();
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        vm.once("tick", move |_| {
            *c.borrow_mut() += 1;
            Ok(())
        });
        vm.emit("tick", &[]);
        vm.emit("tick", &[]);
        assert_eq!(*count.borrow(), 1);

        let h = vm.once("tock", |_| Ok(()));
        assert_eq!(vm.listener_count("tock"), 1);
        vm.off("tock", &h);
        assert_eq!(vm.listener_count("tock"), 0);
    }

    #[test]
    fn test_handler_error_does_not_stop_others() {
        reset_runtime();
        crate::config::configure(|c| c.error_handler = Some(Rc::new(|_, _, _| Ok(()))));
        let vm = instance();
        let reached = Rc::new(RefCell::new(false));
        let r = reached.clone();
        vm.on("go", |_| Err(crate::Error::msg("first fails")));
        vm.on("go", move |_| {
            *r.borrow_mut() = true;
            Ok(())
        });
        vm.emit("go", &[]);
        assert!(*reached.borrow());
    }

    #[test]
    fn test_parent_listeners_are_swapped() {
        reset_runtime();
        let vm = instance();
        let first: Handler = Rc::new(|_| Ok(()));
        let second: Handler = Rc::new(|_| Ok(()));

        let mut listeners = IndexMap::new();
        listeners.insert("change".to_string(), first);
        update_component_listeners(&vm, &listeners);
        assert_eq!(vm.listener_count("change"), 1);

        listeners.insert("change".to_string(), second);
        update_component_listeners(&vm, &listeners);
        assert_eq!(vm.listener_count("change"), 1);

        update_component_listeners(&vm, &IndexMap::new());
        assert_eq!(vm.listener_count("change"), 0);
    }
}
