//! The evaluator seam.
//!
//! The bridge only needs two things from an embedded evaluator: install a
//! symbol space, and evaluate source to success or a diagnostic.

use tether_native::Exports;
use tether_script::Interpreter;

use crate::config::BridgeConfig;

/// An embedded evaluator owned by one instance.
///
/// Callbacks installed through [`Evaluator::install`] may run on any
/// thread, and evaluation may re-enter through them.
pub trait Evaluator: Send + Sync {
    /// Merge `exports` into the symbol space.
    fn install(&self, exports: Exports);

    /// Evaluate `source`. Errors carry the evaluator's diagnostic text.
    fn evaluate(&self, source: &str) -> Result<(), String>;
}

impl Evaluator for Interpreter {
    fn install(&self, exports: Exports) {
        self.use_exports(exports);
    }

    fn evaluate(&self, source: &str) -> Result<(), String> {
        self.eval(source).map(drop).map_err(|diagnostics| diagnostics.to_string())
    }
}

/// Builds a fresh evaluator for each new instance.
pub type EvaluatorFactory = dyn Fn(&BridgeConfig) -> Box<dyn Evaluator> + Send + Sync;

/// The default evaluator: a tether script interpreter.
pub fn script_evaluator(config: &BridgeConfig) -> Box<dyn Evaluator> {
    Box::new(
        Interpreter::builder()
            .stdlib(config.stdlib)
            .max_call_depth(config.max_call_depth)
            .build(),
    )
}
