//! Bridge configuration.
//!
//! Built in code with the builder methods, or read from `TETHER_*`
//! environment variables with [`BridgeConfig::from_env`]:
//!
//! | Variable | Effect |
//! |---|---|
//! | `TETHER_STDLIB=0` | do not install the built-in symbol sets |
//! | `TETHER_LOG_SOURCE=1` | log submitted source at debug level |
//! | `TETHER_MAX_CALL_DEPTH=<n>` | script recursion limit |
//! | `TETHER_MODULE_META=<name>` | name of the finalizer metatable |

use tether_script::DEFAULT_MAX_CALL_DEPTH;

/// Default name of the metatable carrying the module finalizer.
pub const DEFAULT_MODULE_META: &str = "TetherResourceMeta";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeConfig {
    pub stdlib: bool,
    pub log_source: bool,
    pub max_call_depth: usize,
    pub module_meta: String,
}

impl BridgeConfig {
    pub fn new() -> Self {
        BridgeConfig {
            stdlib: true,
            log_source: false,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            module_meta: DEFAULT_MODULE_META.to_string(),
        }
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new();
        if let Some(value) = lookup("TETHER_STDLIB") {
            config.stdlib = flag(&value);
        }
        if let Some(value) = lookup("TETHER_LOG_SOURCE") {
            config.log_source = flag(&value);
        }
        if let Some(value) = lookup("TETHER_MAX_CALL_DEPTH") {
            match value.trim().parse() {
                Ok(depth) => config.max_call_depth = depth,
                Err(_) => tracing::warn!(%value, "ignoring invalid TETHER_MAX_CALL_DEPTH"),
            }
        }
        if let Some(value) = lookup("TETHER_MODULE_META") {
            if !value.is_empty() {
                config.module_meta = value;
            }
        }
        config
    }

    #[must_use]
    pub fn stdlib(mut self, enabled: bool) -> Self {
        self.stdlib = enabled;
        self
    }

    #[must_use]
    pub fn log_source(mut self, enabled: bool) -> Self {
        self.log_source = enabled;
        self
    }

    #[must_use]
    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    #[must_use]
    pub fn module_meta(mut self, name: impl Into<String>) -> Self {
        self.module_meta = name.into();
        self
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "off" | "no"
    )
}
