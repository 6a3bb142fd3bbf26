//! Polled YAML manifest of implementors and handlers
//!
//! Each poll is diffed against the previous one; the differences become
//! register, update and unregister notifications.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use whiteboard_api::{PropertyBag, ServiceId};

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub implementors: Vec<ImplementorEntry>,
    pub handlers: Vec<HandlerEntry>,
}

/// An echo implementor
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ImplementorEntry {
    pub id: ServiceId,
    #[serde(default)]
    pub properties: PropertyBag,
    /// Prepended to every echoed request body
    #[serde(default)]
    pub greeting: String,
}

/// A logging handler
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct HandlerEntry {
    pub id: ServiceId,
    #[serde(default)]
    pub properties: PropertyBag,
    /// Protocol binding; absent for a logical handler
    #[serde(default)]
    pub binding: Option<String>,
}

/// One difference between two manifests
#[derive(Clone, Debug, PartialEq)]
pub enum Change {
    ImplementorAdded(ImplementorEntry),
    ImplementorUpdated(ServiceId, PropertyBag),
    ImplementorRemoved(ServiceId),
    HandlerAdded(HandlerEntry),
    HandlerUpdated(HandlerEntry),
    HandlerRemoved(ServiceId),
}

impl Manifest {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading manifest {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing manifest {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let manifest: Manifest = if text.trim().is_empty() {
            Manifest::default()
        } else {
            serde_yaml::from_str(text)?
        };
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for id in self.implementors.iter().map(|i| i.id) {
            if !seen.insert(id) {
                bail!("implementor {id} is declared twice");
            }
        }
        let mut seen = HashSet::new();
        for id in self.handlers.iter().map(|h| h.id) {
            if !seen.insert(id) {
                bail!("handler {id} is declared twice");
            }
        }
        Ok(())
    }

    /// Changes turning `self` into `next`.
    ///
    /// Removals come first, then handlers, then implementors, so that new
    /// implementors are wired against the new handler set. An implementor
    /// or handler whose backing instance changes is registered again
    /// rather than updated.
    pub fn diff(&self, next: &Manifest) -> Vec<Change> {
        let old_impls: BTreeMap<_, _> = self.implementors.iter().map(|i| (i.id, i)).collect();
        let new_impls: BTreeMap<_, _> = next.implementors.iter().map(|i| (i.id, i)).collect();
        let old_handlers: BTreeMap<_, _> = self.handlers.iter().map(|h| (h.id, h)).collect();
        let new_handlers: BTreeMap<_, _> = next.handlers.iter().map(|h| (h.id, h)).collect();

        let mut changes = Vec::new();
        for id in old_handlers.keys().filter(|id| !new_handlers.contains_key(*id)) {
            changes.push(Change::HandlerRemoved(*id));
        }
        for id in old_impls.keys().filter(|id| !new_impls.contains_key(*id)) {
            changes.push(Change::ImplementorRemoved(*id));
        }

        for (id, handler) in &new_handlers {
            match old_handlers.get(id) {
                None => changes.push(Change::HandlerAdded((*handler).clone())),
                Some(old) if old.binding != handler.binding => {
                    changes.push(Change::HandlerAdded((*handler).clone()))
                }
                Some(old) if old.properties != handler.properties => {
                    changes.push(Change::HandlerUpdated((*handler).clone()))
                }
                Some(_) => {}
            }
        }

        for (id, implementor) in &new_impls {
            match old_impls.get(id) {
                None => changes.push(Change::ImplementorAdded((*implementor).clone())),
                Some(old) if old.greeting != implementor.greeting => {
                    changes.push(Change::ImplementorAdded((*implementor).clone()))
                }
                Some(old) if old.properties != implementor.properties => {
                    changes.push(Change::ImplementorUpdated(*id, implementor.properties.clone()))
                }
                Some(_) => {}
            }
        }
        changes
    }
}
