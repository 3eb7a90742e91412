//! Promise lifecycle hook aggregation.
//!
//! The host accepts a single callback per lifecycle phase. Observers that
//! register independently are accumulated here and folded into one composed
//! callback per phase every time the set changes.

use super::error::JsError;
use super::js_value::JSValue;
use std::fmt;
use std::rc::Rc;

/// Observer for one promise lifecycle phase, called with `(promise, parent)`.
///
/// An error stops the remaining hooks of that phase and is handed to the host.
pub type PromiseHook = Rc<dyn Fn(&JSValue, &JSValue) -> Result<(), JsError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Init,
    Before,
    After,
    Resolve,
}

impl HookPhase {
    pub const ALL: [HookPhase; 4] = [
        HookPhase::Init,
        HookPhase::Before,
        HookPhase::After,
        HookPhase::Resolve,
    ];

    fn index(self) -> usize {
        match self {
            HookPhase::Init => 0,
            HookPhase::Before => 1,
            HookPhase::After => 2,
            HookPhase::Resolve => 3,
        }
    }
}

/// One optional callback per phase.
///
/// Used both to register new observers and to describe the composed set
/// installed on the host.
#[derive(Clone, Default)]
pub struct PromiseHooks {
    pub init: Option<PromiseHook>,
    pub before: Option<PromiseHook>,
    pub after: Option<PromiseHook>,
    pub resolve: Option<PromiseHook>,
}

impl PromiseHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_init<F>(mut self, hook: F) -> Self
    where
        F: Fn(&JSValue, &JSValue) -> Result<(), JsError> + 'static,
    {
        self.init = Some(Rc::new(hook));
        self
    }

    pub fn on_before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&JSValue, &JSValue) -> Result<(), JsError> + 'static,
    {
        self.before = Some(Rc::new(hook));
        self
    }

    pub fn on_after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&JSValue, &JSValue) -> Result<(), JsError> + 'static,
    {
        self.after = Some(Rc::new(hook));
        self
    }

    pub fn on_resolve<F>(mut self, hook: F) -> Self
    where
        F: Fn(&JSValue, &JSValue) -> Result<(), JsError> + 'static,
    {
        self.resolve = Some(Rc::new(hook));
        self
    }

    pub fn get(&self, phase: HookPhase) -> Option<&PromiseHook> {
        match phase {
            HookPhase::Init => self.init.as_ref(),
            HookPhase::Before => self.before.as_ref(),
            HookPhase::After => self.after.as_ref(),
            HookPhase::Resolve => self.resolve.as_ref(),
        }
    }

    fn into_array(self) -> [Option<PromiseHook>; 4] {
        [self.init, self.before, self.after, self.resolve]
    }
}

impl fmt::Debug for PromiseHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseHooks")
            .field("init", &self.init.is_some())
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .field("resolve", &self.resolve.is_some())
            .finish()
    }
}

/// Registered observers per phase, in registration order.
#[derive(Default)]
pub struct PromiseHookLists {
    lists: [Vec<PromiseHook>; 4],
}

impl PromiseHookLists {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the given hooks and return the recomposed callbacks.
    pub fn add(&mut self, hooks: PromiseHooks) -> PromiseHooks {
        for (list, hook) in self.lists.iter_mut().zip(hooks.into_array()) {
            if let Some(hook) = hook {
                list.push(hook);
            }
        }
        self.composed()
    }

    pub fn len(&self, phase: HookPhase) -> usize {
        self.lists[phase.index()].len()
    }

    /// One callback per phase built from the current lists.
    pub fn composed(&self) -> PromiseHooks {
        let [init, before, after, resolve] = &self.lists;
        PromiseHooks {
            init: compose(init),
            before: compose(before),
            after: compose(after),
            resolve: compose(resolve),
        }
    }
}

/// Small lists get fixed-arity wrappers so the common case captures no
/// slice and runs no loop.
fn compose(hooks: &[PromiseHook]) -> Option<PromiseHook> {
    match hooks {
        [] => None,
        [hook] => Some(hook.clone()),
        [hook1, hook2] => {
            let (hook1, hook2) = (hook1.clone(), hook2.clone());
            Some(Rc::new(move |promise: &JSValue, parent: &JSValue| {
                hook1(promise, parent)?;
                hook2(promise, parent)
            }))
        }
        [hook1, hook2, hook3] => {
            let (hook1, hook2, hook3) = (hook1.clone(), hook2.clone(), hook3.clone());
            Some(Rc::new(move |promise: &JSValue, parent: &JSValue| {
                hook1(promise, parent)?;
                hook2(promise, parent)?;
                hook3(promise, parent)
            }))
        }
        _ => {
            let hooks: Rc<[PromiseHook]> = hooks.into();
            Some(Rc::new(move |promise: &JSValue, parent: &JSValue| {
                hooks.iter().try_for_each(|hook| hook(promise, parent))
            }))
        }
    }
}
