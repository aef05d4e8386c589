//! Maps action type names to handler constructors.
//!
//! Registration happens at startup: [`ActionRegistry::with_builtins`] installs the
//! handlers shipped with the crate and [`ActionRegistry::register`] adds more. The
//! parser resolves each name once and reuses the constructor for later blocks of the
//! same type; an unknown name is a parse error.

use crate::action::{Action, ActionCategory};
use crate::actions::{
    a2d::Acquire, beep::Beep, camera::CameraCapture, count::Repeat, sleep::Delay,
    stage::StageScan,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Builds a fresh handler for one action block.
pub type ActionFactory = Arc<dyn Fn() -> Box<dyn Action> + Send + Sync>;

/// A registered action type.
#[derive(Clone)]
pub struct Registration {
    category: ActionCategory,
    factory: ActionFactory,
}

impl Registration {
    pub fn category(&self) -> ActionCategory {
        self.category
    }

    /// Construct a new handler.
    pub fn instantiate(&self) -> Box<dyn Action> {
        (self.factory)()
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

/// Table of known action types.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    entries: BTreeMap<String, Registration>,
}

impl ActionRegistry {
    /// Registry without any action types.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every action type shipped with the crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register("count", ActionCategory::Composite, || Box::new(Repeat::new()))
            .register("sleep", ActionCategory::Composite, || Box::new(Delay::new()))
            .register("stage", ActionCategory::Composite, || {
                Box::new(StageScan::new())
            })
            .register("piezo", ActionCategory::Composite, || {
                Box::new(StageScan::piezo())
            })
            .register("a2d", ActionCategory::Leaf, || Box::new(Acquire::new()))
            .register("beep", ActionCategory::Leaf, || Box::new(Beep::new()))
            .register("camera", ActionCategory::Leaf, || {
                Box::new(CameraCapture::new())
            });
        registry
            .alias("ThorlabsPiezoStage", "piezo")
            .alias("A2D", "a2d");
        registry
    }

    /// Register (or replace) the constructor for `kind`.
    pub fn register<F>(&mut self, kind: &str, category: ActionCategory, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Action> + Send + Sync + 'static,
    {
        self.entries.insert(
            kind.to_string(),
            Registration {
                category,
                factory: Arc::new(factory),
            },
        );
        self
    }

    /// Make `alias` resolve to the same constructor as `kind`. No-op if `kind` is
    /// unknown.
    pub fn alias(&mut self, alias: &str, kind: &str) -> &mut Self {
        if let Some(registration) = self.entries.get(kind).cloned() {
            self.entries.insert(alias.to_string(), registration);
        }
        self
    }

    /// Constructor for `kind`, if registered. Names are case-sensitive.
    pub fn lookup(&self, kind: &str) -> Option<&Registration> {
        self.entries.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    /// Registered names, sorted.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
