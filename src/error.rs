//! Error taxonomy and the error-bubbling chain.
//!
//! User code (render functions, hooks, watchers, methods, event handlers)
//! returns [`Result`]. Errors raised by user code never unwind the scheduler;
//! they are funneled through [`handle_error`], which walks the component
//! ancestor chain invoking `error_captured` hooks before falling back to the
//! configured global handler and finally to [`log_error`].
//!
//! Misuse of the API is reported through [`warn`] / [`dev_warn`]. Warnings
//! never alter control flow.

use crate::component::Instance;
use crate::config::with_config;
use crate::observer::dep::untracked;

/// Errors produced by user code or by the runtime on its behalf.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Ad-hoc error raised from user code.
    #[error("{0}")]
    User(String),

    /// A method was called that the component does not declare.
    #[error("method \"{0}\" is not defined on the component")]
    UnknownMethod(String),

    /// A child component was created without a rendering parent.
    #[error("component \"{0}\" was instantiated outside of a render pass")]
    NoActiveInstance(String),

    /// An operation was attempted on an instance that has been destroyed.
    #[error("instance {0} has been destroyed")]
    Destroyed(u64),
}

impl Error {
    /// Build a user error from any message.
    pub fn msg(message: impl Into<String>) -> Self {
        Error::User(message.into())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Recoverable refusal of the explicit mutation API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    /// The target is a component instance.
    #[error("cannot add or delete reactive properties on a component instance at runtime")]
    InstanceTarget,

    /// The target is some component's root data object.
    #[error("cannot add or delete reactive properties on a component's root data at runtime")]
    RootData,

    /// A named key was used against an array.
    #[error("\"{0}\" is not a valid array index")]
    InvalidArrayKey(String),

    /// The target is not a container.
    #[error("cannot set or delete a reactive property on a {0} value")]
    PrimitiveTarget(&'static str),
}

// =============================================================================
// Error bubbling
// =============================================================================

/// Report an error raised while running user code on behalf of `vm`.
///
/// Each ancestor's `error_captured` hooks run in order; a hook returning
/// `Ok(true)` captures the error and stops propagation. Unsuppressed errors
/// reach the global handler.
pub fn handle_error(err: &Error, vm: Option<&Instance>, info: &str) {
    // Tracking is off while hooks run so they can't subscribe the current unit.
    untracked(|| {
        if let Some(source) = vm {
            let mut current = source.parent();
            while let Some(ancestor) = current {
                let hooks = ancestor.options().error_captured.clone();
                for hook in hooks {
                    match hook(&ancestor, err, source, info) {
                        Ok(true) => return,
                        Ok(false) => {}
                        Err(hook_err) => {
                            global_handle_error(&hook_err, Some(&ancestor), "errorCaptured hook")
                        }
                    }
                }
                current = ancestor.parent();
            }
        }
        global_handle_error(err, vm, info);
    })
}

/// Run `f`, funneling any error to [`handle_error`].
pub fn invoke_with_error_handling<T>(
    f: impl FnOnce() -> Result<T>,
    vm: Option<&Instance>,
    info: &str,
) -> Option<T> {
    match f() {
        Ok(value) => Some(value),
        Err(err) => {
            handle_error(&err, vm, info);
            None
        }
    }
}

fn global_handle_error(err: &Error, vm: Option<&Instance>, info: &str) {
    let handler = with_config(|c| c.error_handler.clone());
    if let Some(handler) = handler {
        match handler(err, vm, info) {
            Ok(()) => return,
            // A handler rethrowing the same error shouldn't log twice.
            Err(handler_err) if &handler_err == err => {}
            Err(handler_err) => log_error(&handler_err, None, "config.error_handler"),
        }
    }
    log_error(err, vm, info);
}

/// Last stop of the error chain.
pub fn log_error(err: &Error, vm: Option<&Instance>, info: &str) {
    tracing::error!(
        component = %component_label(vm),
        info,
        error = %err,
        "error in {info}"
    );
}

// =============================================================================
// Warnings
// =============================================================================

/// Emit a misuse diagnostic.
///
/// Routed to the configured `warn_handler` when present, otherwise logged.
/// Suppressed entirely when `silent` is set.
pub fn warn(message: &str, vm: Option<&Instance>) {
    let route = with_config(|c| (c.silent, c.warn_handler.clone()));
    match route {
        (true, _) => {}
        (false, Some(handler)) => handler(message, vm),
        (false, None) => tracing::warn!(component = %component_label(vm), "{message}"),
    }
}

/// Emit a warning only when development diagnostics are enabled.
pub fn dev_warn(message: &str, vm: Option<&Instance>) {
    if with_config(|c| c.dev_warnings) {
        warn(message, vm);
    }
}

/// Human label for a component in diagnostics.
pub fn component_label(vm: Option<&Instance>) -> String {
    match vm {
        None => "<Unknown>".to_string(),
        Some(vm) if vm.is_root() => "<Root>".to_string(),
        Some(vm) => match vm.name() {
            Some(name) => format!("<{name}>"),
            None => "<Anonymous>".to_string(),
        },
    }
}
