//! Capability providers.
//!
//! Providers are looked up by capability name, never broadcast. Any number
//! of loaded plugins may *offer* a capability, but at most one offer per
//! capability is *active* at a time.

use crate::Error;
use serde_json::Value;
use std::{collections::HashMap, fmt, sync::Arc};
use tracing::debug;

type ProviderCall = Arc<dyn Fn(&[Value]) -> anyhow::Result<Option<String>> + Send + Sync>;

/// A provider method bound to a live plugin instance
#[derive(Clone)]
pub struct Provider {
    plugin: String,
    capability: String,
    method: String,
    call: ProviderCall,
}

impl Provider {
    pub fn new<F>(
        plugin: impl Into<String>,
        capability: impl Into<String>,
        method: impl Into<String>,
        f: F,
    ) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<Option<String>> + Send + Sync + 'static,
    {
        Self {
            plugin: plugin.into(),
            capability: capability.into(),
            method: method.into(),
            call: Arc::new(f),
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn capability(&self) -> &str {
        &self.capability
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Call the provider. An empty string counts as "nothing to offer".
    pub fn call(&self, args: &[Value]) -> anyhow::Result<Option<String>> {
        Ok((self.call)(args)?.filter(|s| !s.is_empty()))
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("plugin", &self.plugin)
            .field("capability", &self.capability)
            .field("method", &self.method)
            .finish()
    }
}

/// Offers and active selections, owned by the plugin manager
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    /// Every offer in load order
    offers: Vec<Provider>,
    /// Capability name to the plugin whose offer is active
    active: HashMap<String, String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an offer. A plugin re-offering a capability replaces its
    /// previous offer.
    pub fn offer(&mut self, provider: Provider) {
        debug!(
            "Plugin '{}' offers capability '{}' via {}",
            provider.plugin, provider.capability, provider.method
        );
        match self
            .offers
            .iter_mut()
            .find(|p| p.plugin == provider.plugin && p.capability == provider.capability)
        {
            Some(existing) => *existing = provider,
            None => self.offers.push(provider),
        }
    }

    /// Make `plugin`'s offer the active provider for `capability`.
    ///
    /// Fails if another plugin's offer is already active; clear it first.
    pub fn set_active(&mut self, capability: &str, plugin: &str) -> Result<(), Error> {
        if !self.offers.iter().any(|p| p.capability == capability && p.plugin == plugin) {
            return Err(Error::ProviderNotOffered {
                capability: capability.to_string(),
                plugin: plugin.to_string(),
            });
        }
        match self.active.get(capability) {
            Some(active) if active == plugin => Ok(()),
            Some(active) => Err(Error::ProviderConflict {
                capability: capability.to_string(),
                active: active.clone(),
            }),
            None => {
                debug!("Activating provider '{}' for '{}'", plugin, capability);
                self.active.insert(capability.to_string(), plugin.to_string());
                Ok(())
            }
        }
    }

    /// Deactivate whatever provides `capability`, returning its plugin name
    pub fn clear_active(&mut self, capability: &str) -> Option<String> {
        self.active.remove(capability)
    }

    pub fn active_plugin(&self, capability: &str) -> Option<&str> {
        self.active.get(capability).map(String::as_str)
    }

    /// The active provider for `capability`
    pub fn resolve(&self, capability: &str) -> Option<&Provider> {
        let plugin = self.active.get(capability)?;
        self.offers
            .iter()
            .find(|p| p.capability == capability && &p.plugin == plugin)
    }

    /// Plugins offering `capability`, in load order
    pub fn candidates(&self, capability: &str) -> Vec<&str> {
        self.offers
            .iter()
            .filter(|p| p.capability == capability)
            .map(|p| p.plugin.as_str())
            .collect()
    }

    /// Drop every offer and activation belonging to `plugin`.
    ///
    /// Returns the capabilities `plugin` was the active provider for, now
    /// left without one.
    pub fn remove_plugin(&mut self, plugin: &str) -> Vec<String> {
        self.offers.retain(|p| p.plugin != plugin);
        let mut vacated: Vec<String> = self
            .active
            .iter()
            .filter(|(_, active)| *active == plugin)
            .map(|(capability, _)| capability.clone())
            .collect();
        self.active.retain(|_, active| active != plugin);
        vacated.sort();
        vacated
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(plugin: &'static str, capability: &str) -> Provider {
        Provider::new(plugin, capability, "url", move |args: &[Value]| {
            let target = args.first().and_then(Value::as_str).unwrap_or_default();
            Ok(Some(format!("https://{}.example.invalid/{}", plugin, target)))
        })
    }

    #[test]
    fn test_resolve_requires_activation() {
        let mut registry = ProviderRegistry::new();
        registry.offer(url("coriolis", "shipyard_url"));
        assert!(registry.resolve("shipyard_url").is_none());

        registry.set_active("shipyard_url", "coriolis").unwrap();
        let provider = registry.resolve("shipyard_url").unwrap();
        assert_eq!(provider.plugin(), "coriolis");
        assert_eq!(
            provider.call(&[Value::from("cobra")]).unwrap().as_deref(),
            Some("https://coriolis.example.invalid/cobra")
        );
    }

    #[test]
    fn test_second_activation_conflicts() {
        let mut registry = ProviderRegistry::new();
        registry.offer(url("coriolis", "shipyard_url"));
        registry.offer(url("edsy", "shipyard_url"));
        registry.set_active("shipyard_url", "coriolis").unwrap();

        let err = registry.set_active("shipyard_url", "edsy").unwrap_err();
        assert!(matches!(err, Error::ProviderConflict { ref active, .. } if active == "coriolis"));
        // Re-activating the same plugin is fine
        registry.set_active("shipyard_url", "coriolis").unwrap();

        assert_eq!(registry.clear_active("shipyard_url").as_deref(), Some("coriolis"));
        registry.set_active("shipyard_url", "edsy").unwrap();
        assert_eq!(registry.active_plugin("shipyard_url"), Some("edsy"));
        assert_eq!(registry.candidates("shipyard_url"), vec!["coriolis", "edsy"]);
    }

    #[test]
    fn test_activation_requires_offer() {
        let mut registry = ProviderRegistry::new();
        let err = registry.set_active("system_url", "eddb").unwrap_err();
        assert!(matches!(err, Error::ProviderNotOffered { .. }));
    }

    #[test]
    fn test_remove_plugin_clears_activation() {
        let mut registry = ProviderRegistry::new();
        registry.offer(url("edsm", "system_url"));
        registry.offer(url("edsm", "station_url"));
        registry.offer(url("inara", "system_url"));
        registry.set_active("system_url", "edsm").unwrap();

        assert_eq!(registry.remove_plugin("edsm"), vec!["system_url"]);
        assert!(registry.resolve("system_url").is_none());
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.candidates("system_url"), vec!["inara"]);
        assert!(registry.candidates("station_url").is_empty());
    }

    #[test]
    fn test_empty_string_means_no_url() {
        let provider = Provider::new("x", "station_url", "url", |_: &[Value]| Ok(Some(String::new())));
        assert_eq!(provider.call(&[]).unwrap(), None);
    }
}
