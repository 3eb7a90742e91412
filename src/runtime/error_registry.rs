//! Error class registry and op result unwrapping.
//!
//! Hosts report failures by class name. The registry maps each name to a
//! builder that produces the script-visible [`JsError`]; unwrapping an
//! [`OpResult`] is a pure transformation into `Result<JSValue, JsError>`.

use super::error::{BridgeError, JsError};
use super::js_value::JSValue;
use super::op_driver::{OpError, OpResult};
use std::collections::HashMap;
use std::panic::Location;
use std::rc::Rc;

/// Builds an error from a message. A builder may itself fail.
pub type ErrorBuilder = Rc<dyn Fn(&str) -> Result<JsError, JsError>>;

/// Standard script error classes registered by [`ErrorRegistry::with_builtins`].
pub const BUILTIN_ERROR_CLASSES: [&str; 6] = [
    "Error",
    "RangeError",
    "ReferenceError",
    "SyntaxError",
    "TypeError",
    "URIError",
];

/// Class name to builder map. Entries can be added but never replaced.
#[derive(Default)]
pub struct ErrorRegistry {
    builders: HashMap<String, ErrorBuilder>,
}

impl ErrorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for name in BUILTIN_ERROR_CLASSES {
            registry.builders.insert(
                name.to_string(),
                Rc::new(move |message: &str| -> Result<JsError, JsError> {
                    Ok(JsError::new(name, message))
                }),
            );
        }
        registry
    }

    /// Register a fallible builder for `class_name`.
    ///
    /// Fails if the class already has a builder; the existing one stays.
    pub fn register_error_builder<F>(&mut self, class_name: &str, builder: F) -> Result<(), BridgeError>
    where
        F: Fn(&str) -> Result<JsError, JsError> + 'static,
    {
        if self.builders.contains_key(class_name) {
            return Err(BridgeError::ErrorClassAlreadyRegistered(
                class_name.to_string(),
            ));
        }
        tracing::debug!(
            event = "op_bridge.error_class.register",
            class_name,
            "Registered error class"
        );
        self.builders.insert(class_name.to_string(), Rc::new(builder));
        Ok(())
    }

    /// Register an infallible constructor for `class_name`.
    pub fn register_error_class<F>(&mut self, class_name: &str, ctor: F) -> Result<(), BridgeError>
    where
        F: Fn(&str) -> JsError + 'static,
    {
        self.register_error_builder(class_name, move |message| Ok(ctor(message)))
    }

    pub fn is_registered(&self, class_name: &str) -> bool {
        self.builders.contains_key(class_name)
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    /// Shared handle to the builder for `class_name`.
    ///
    /// Callers that hold the registry behind a `RefCell` take the handle and
    /// release the borrow before invoking it.
    pub fn builder(&self, class_name: &str) -> Option<ErrorBuilder> {
        self.builders.get(class_name).cloned()
    }

    /// Turn a raw op result into what the script sees.
    ///
    /// Success payloads pass through untouched. Failures are rebuilt through
    /// the registered builder; see [`rebuild_op_error`].
    pub fn unwrap_op_result(
        &self,
        result: OpResult,
        location: Option<&'static Location<'static>>,
    ) -> Result<JSValue, JsError> {
        match result {
            OpResult::Ok(value) => Ok(value),
            OpResult::Err(err) => {
                let builder = self.builder(&err.class_name);
                Err(rebuild_op_error(builder, err, location))
            }
        }
    }

    /// Build the error registered for `class_name` and hand it back as a value.
    ///
    /// See [`build_custom_error_with`].
    #[track_caller]
    pub fn build_custom_error(
        &self,
        class_name: &str,
        message: &str,
        code: Option<&str>,
    ) -> Result<Option<JsError>, JsError> {
        build_custom_error_with(self.builder(class_name), class_name, message, code)
    }
}

/// Rebuild a host failure with `builder`.
///
/// Without a builder the result is a plain `Error` naming the class and
/// carrying the original message. `location` is the call site that issued
/// the op.
pub fn rebuild_op_error(
    builder: Option<ErrorBuilder>,
    err: OpError,
    location: Option<&'static Location<'static>>,
) -> JsError {
    let OpError {
        class_name,
        message,
        code,
    } = err;

    let built = match builder {
        Some(builder) => builder(&message),
        None => {
            tracing::warn!(
                event = "op_bridge.error_class.unregistered",
                class_name = %class_name,
                "Op rejected with an unregistered error class"
            );
            Ok(unregistered_class_error(&class_name, &message))
        }
    };

    let mut js_err = match built {
        Ok(js_err) => js_err,
        // A failing builder rejects with its own error.
        Err(builder_err) => builder_err,
    };
    if let Some(code) = code {
        js_err.code = Some(code);
    }
    js_err.location = location.or(js_err.location);
    js_err
}

/// Run `builder` for a script-requested custom error.
///
/// Returns `Ok(None)` when there is no builder. A builder failure is
/// reported as an `Error` naming the class that could not be built.
#[track_caller]
pub fn build_custom_error_with(
    builder: Option<ErrorBuilder>,
    class_name: &str,
    message: &str,
    code: Option<&str>,
) -> Result<Option<JsError>, JsError> {
    let location = Location::caller();
    let Some(builder) = builder else {
        return Ok(None);
    };
    let mut js_err = builder(message).map_err(|e| {
        JsError::error(format!(
            "Unable to build custom error for \"{class_name}\"\n  {}",
            e.message
        ))
        .with_location(location)
    })?;
    if let Some(code) = code {
        js_err.code = Some(code.to_string());
    }
    js_err.location = Some(location);
    Ok(Some(js_err))
}

fn unregistered_class_error(class_name: &str, message: &str) -> JsError {
    JsError::error(format!(
        "Unregistered error class: \"{class_name}\"\n  {message}\n  \
         Classes of errors returned from ops should be registered via \
         OpBridge::register_error_class()."
    ))
}
