//! Runtime configuration.
//!
//! A single [`Config`] lives per thread, next to the runtime context. Read it
//! with [`with_config`], change it with [`configure`], and restore defaults
//! with [`reset_config`] (tests do this through `reset_runtime`).
//!
//! Handlers are cloned out before they are invoked, so a handler may itself
//! read or change configuration.

use std::cell::RefCell;
use std::rc::Rc;

use crate::component::Instance;
use crate::error::{Error, Result};

/// Global error handler: `(error, instance, info)`.
///
/// Returning an error that differs from the one received logs both.
pub type ErrorHandler = Rc<dyn Fn(&Error, Option<&Instance>, &str) -> Result<()>>;

/// Global warning sink: `(message, instance)`.
pub type WarnHandler = Rc<dyn Fn(&str, Option<&Instance>)>;

/// Thread-wide runtime options.
#[derive(Clone)]
pub struct Config {
    /// Suppress all warnings.
    pub silent: bool,
    /// Defer queued units to the next tick. When false, every enqueue flushes
    /// immediately and `Dep::notify` sorts subscribers by creation order.
    pub async_updates: bool,
    /// Emit development-time misuse diagnostics.
    pub dev_warnings: bool,
    /// Wrap render and patch in tracing spans.
    pub performance: bool,
    /// Receives errors that no `error_captured` hook suppressed.
    pub error_handler: Option<ErrorHandler>,
    /// Receives warnings instead of the log.
    pub warn_handler: Option<WarnHandler>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            silent: false,
            async_updates: true,
            dev_warnings: true,
            performance: false,
            error_handler: None,
            warn_handler: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("silent", &self.silent)
            .field("async_updates", &self.async_updates)
            .field("dev_warnings", &self.dev_warnings)
            .field("performance", &self.performance)
            .field("error_handler", &self.error_handler.is_some())
            .field("warn_handler", &self.warn_handler.is_some())
            .finish()
    }
}

thread_local! {
    static CONFIG: RefCell<Config> = RefCell::new(Config::default());
}

/// Read the current configuration.
pub fn with_config<R>(f: impl FnOnce(&Config) -> R) -> R {
    CONFIG.with(|config| f(&config.borrow()))
}

/// Mutate the current configuration.
pub fn configure(f: impl FnOnce(&mut Config)) {
    CONFIG.with(|config| f(&mut config.borrow_mut()))
}

/// Restore defaults.
pub fn reset_config() {
    CONFIG.with(|config| *config.borrow_mut() = Config::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        reset_config();
        with_config(|c| {
            assert!(!c.silent);
            assert!(c.async_updates);
            assert!(c.dev_warnings);
            assert!(c.error_handler.is_none());
        });
    }

    #[test]
    fn test_configure_and_reset() {
        reset_config();
        configure(|c| {
            c.async_updates = false;
            c.silent = true;
        });
        assert!(!with_config(|c| c.async_updates));
        assert!(with_config(|c| c.silent));

        reset_config();
        assert!(with_config(|c| c.async_updates));
    }
}
