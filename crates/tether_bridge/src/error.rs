//! Bridge error types.
//!
//! Every error is terminal for the call that raised it. The boundary turns
//! its `Display` text into the host's error value.

use tether_native::{NativeType, SignatureError};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum BridgeError {
    /// No registered function under this name.
    #[error("function `{name}` not found")]
    NotFound { name: String },

    #[error("call to `{name}`: got {got} arguments, need {}", need_text(.need, .variadic))]
    ArityMismatch {
        name: String,
        got: usize,
        need: usize,
        variadic: bool,
    },

    /// Argument at `position` (0-based) does not fit the declared parameter.
    #[error("call to `{name}`: arg {position} is {found}, need {required}")]
    TypeMismatch {
        name: String,
        position: usize,
        found: NativeType,
        required: NativeType,
    },

    /// A registered function ran and reported failure.
    #[error("call to `{name}` failed: {message}")]
    CallFailed { name: String, message: String },

    /// The named host global is not a function.
    #[error("host global `{name}` is not callable")]
    NotCallable { name: String },

    /// The protected host call raised an error.
    #[error("host call to `{name}` failed: {message}")]
    HostCallFailed { name: String, message: String },

    #[error("execution failed: {message}")]
    EvaluationFailed { message: String },

    /// The host passed arguments an entrypoint cannot use.
    #[error("bad argument to `{entrypoint}`: {message}")]
    BadArgument {
        entrypoint: &'static str,
        message: String,
    },
}

fn need_text(need: &usize, variadic: &bool) -> String {
    if *variadic {
        format!("at least {need}")
    } else {
        need.to_string()
    }
}

impl BridgeError {
    /// Attach a function name to a signature failure.
    pub fn from_signature(name: &str, error: SignatureError) -> Self {
        match error {
            SignatureError::Arity {
                got,
                need,
                variadic,
            } => BridgeError::ArityMismatch {
                name: name.to_string(),
                got,
                need,
                variadic,
            },
            SignatureError::Type {
                position,
                found,
                required,
            } => BridgeError::TypeMismatch {
                name: name.to_string(),
                position,
                found,
                required,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn messages_name_the_function() {
        let err = BridgeError::NotFound {
            name: "missing".to_string(),
        };
        assert_eq!(err.to_string(), "function `missing` not found");

        let err = BridgeError::from_signature(
            "sum",
            SignatureError::Arity {
                got: 0,
                need: 1,
                variadic: true,
            },
        );
        assert_eq!(err.to_string(), "call to `sum`: got 0 arguments, need at least 1");
    }

    #[test]
    fn type_mismatch_names_both_types() {
        let err = BridgeError::from_signature(
            "add",
            SignatureError::Type {
                position: 1,
                found: NativeType::Str,
                required: NativeType::F64,
            },
        );
        assert_eq!(err.to_string(), "call to `add`: arg 1 is str, need float");
    }
}
