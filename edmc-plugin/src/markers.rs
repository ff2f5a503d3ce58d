//! Capability declarations attached to a plugin class.
//!
//! A [`ClassMarkers`] value is the per-class registry of which methods want
//! which events and which methods provide which capabilities. It is built
//! once, when the plugin's module is executed, and is pure metadata: nothing
//! here runs plugin code or talks to a manager. The manager turns it into
//! live, instance-bound callbacks when the plugin is loaded.
//!
//! Plugin authors normally get their markers from the `#[edmc_plugin]`
//! attribute macro; the builder below is what that macro expands to.

use crate::event::Event;
use serde_json::Value;
use std::sync::Arc;

pub use crate::event::names::WILDCARD;

/// Unbound hook method
pub type HookFn<P> = Arc<dyn Fn(&mut P, &Event) -> anyhow::Result<()> + Send + Sync>;

/// Unbound provider method; returns `None` when it has nothing to offer
pub type ProviderFn<P> = Arc<dyn Fn(&mut P, &[Value]) -> anyhow::Result<Option<String>> + Send + Sync>;

/// Errors raised while declaring hooks, providers or plugin classes
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeclarationError {
    #[error("{method} hooked onto the same event multiple times: {event}")]
    DuplicateHook { method: String, event: String },
    #[error("{method} hooked onto an empty event name")]
    EmptyEventName { method: String },
    #[error("{method} provides an empty capability name")]
    EmptyCapability { method: String },
    #[error("capability {capability} is already provided by {existing}")]
    DuplicateProvider { capability: String, existing: String },
    #[error("{class} is already marked as a plugin entry point")]
    AlreadyPluginClass { class: String },
}

/// A method hooked onto one or more events
pub struct HookMethod<P> {
    name: String,
    events: Vec<String>,
    call: HookFn<P>,
}

impl<P> HookMethod<P> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Event names in declaration order
    pub fn events(&self) -> &[String] {
        &self.events
    }

    pub fn call(&self) -> &HookFn<P> {
        &self.call
    }
}

/// A method providing a named capability
pub struct ProviderMethod<P> {
    name: String,
    capability: String,
    call: ProviderFn<P>,
}

impl<P> ProviderMethod<P> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capability(&self) -> &str {
        &self.capability
    }

    pub fn call(&self) -> &ProviderFn<P> {
        &self.call
    }
}

/// Per-class hook and provider registry
pub struct ClassMarkers<P> {
    hooks: Vec<HookMethod<P>>,
    providers: Vec<ProviderMethod<P>>,
}

impl<P> Default for ClassMarkers<P> {
    fn default() -> Self {
        Self {
            hooks: Vec::new(),
            providers: Vec::new(),
        }
    }
}

impl<P> ClassMarkers<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook `method` onto `events`.
    ///
    /// Hooking an already-declared method again adds the new event names to
    /// it (the first callable is kept), the same way stacked attributes
    /// accumulate.
    pub fn hook<F>(mut self, method: &str, events: &[&str], f: F) -> Result<Self, DeclarationError>
    where
        F: Fn(&mut P, &Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let idx = match self.hooks.iter().position(|h| h.name == method) {
            Some(idx) => idx,
            None => {
                self.hooks.push(HookMethod {
                    name: method.to_string(),
                    events: Vec::new(),
                    call: Arc::new(f),
                });
                self.hooks.len() - 1
            }
        };

        let hooked = &mut self.hooks[idx];
        for event in events {
            if event.is_empty() {
                return Err(DeclarationError::EmptyEventName {
                    method: method.to_string(),
                });
            }
            if hooked.events.iter().any(|e| e == event) {
                return Err(DeclarationError::DuplicateHook {
                    method: method.to_string(),
                    event: event.to_string(),
                });
            }
            hooked.events.push(event.to_string());
        }
        Ok(self)
    }

    /// Mark `method` as the class's provider for `capability`
    pub fn provider<F>(mut self, capability: &str, method: &str, f: F) -> Result<Self, DeclarationError>
    where
        F: Fn(&mut P, &[Value]) -> anyhow::Result<Option<String>> + Send + Sync + 'static,
    {
        if capability.is_empty() {
            return Err(DeclarationError::EmptyCapability {
                method: method.to_string(),
            });
        }
        if let Some(existing) = self.providers.iter().find(|p| p.capability == capability) {
            return Err(DeclarationError::DuplicateProvider {
                capability: capability.to_string(),
                existing: existing.name.clone(),
            });
        }
        self.providers.push(ProviderMethod {
            name: method.to_string(),
            capability: capability.to_string(),
            call: Arc::new(f),
        });
        Ok(self)
    }

    /// Hooked methods in declaration order
    pub fn hooks(&self) -> &[HookMethod<P>] {
        &self.hooks
    }

    pub fn providers(&self) -> &[ProviderMethod<P>] {
        &self.providers
    }

    /// Event names `method` is hooked onto
    pub fn events_for(&self, method: &str) -> Option<&[String]> {
        self.hooks
            .iter()
            .find(|h| h.name == method)
            .map(|h| h.events.as_slice())
    }

    /// Every event name any method is hooked onto, first occurrence order
    pub fn hooked_events(&self) -> Vec<&str> {
        let mut events: Vec<&str> = Vec::new();
        for event in self.hooks.iter().flat_map(|h| h.events.iter()) {
            if !events.contains(&event.as_str()) {
                events.push(event);
            }
        }
        events
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty() && self.providers.is_empty()
    }
}
