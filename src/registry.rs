//! Instance pool
//!
//! A façade over [`Instance`] that shares loaded models by profile id with
//! lease counting. The last lease dropped shuts the instance down. Pool
//! bookkeeping lives outside the orchestration core; it never touches a
//! generation in flight.

use std::ops::Deref;
use std::sync::Arc;

use dashmap::DashMap;

use crate::inference::{Instance, InstanceError, InstanceOptions};
use crate::types::{InstanceSettings, ModelArchitecture, ModelProfile};

/// Builds an [`Instance`] for a profile; injectable so tests can supply
/// scripted engines.
pub type InstanceBuilder =
    Box<dyn Fn(ModelProfile, InstanceSettings) -> Instance + Send + Sync>;

struct PoolEntry {
    instance: Arc<Instance>,
    leases: usize,
}

/// Shared pool of loaded instances keyed by profile id.
pub struct InstancePool {
    entries: Arc<DashMap<String, PoolEntry>>,
    builder: InstanceBuilder,
}

impl InstancePool {
    /// Pool building llama.cpp-backed instances with default options.
    pub fn new() -> Self {
        Self::with_builder(Box::new(|profile, settings| {
            Instance::local(profile, settings, InstanceOptions::default())
        }))
    }

    pub fn with_builder(builder: InstanceBuilder) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            builder,
        }
    }

    /// Acquire a lease on the instance for `profile`, loading it first if
    /// no lease exists yet.
    ///
    /// An unsupported-architecture load failure is retried once with the
    /// generic architecture tag — the one visible retry at this level.
    pub async fn acquire(
        &self,
        profile: ModelProfile,
        settings: InstanceSettings,
    ) -> Result<Lease, InstanceError> {
        if let Some(mut entry) = self.entries.get_mut(&profile.id) {
            entry.leases += 1;
            tracing::debug!("Leased existing instance {} ({})", profile.id, entry.leases);
            return Ok(Lease {
                id: profile.id.clone(),
                instance: entry.instance.clone(),
                entries: self.entries.clone(),
            });
        }

        let instance = match self.start(profile.clone(), settings.clone()).await {
            Ok(instance) => instance,
            Err(InstanceError::UnsupportedArchitecture { message, .. })
                if profile.architecture != ModelArchitecture::Generic =>
            {
                tracing::warn!(
                    "Load failed for {} ({}); retrying with the generic architecture tag",
                    profile.id,
                    message
                );
                self.start(profile.clone().with_generic_architecture(), settings)
                    .await?
            }
            Err(e) => return Err(e),
        };

        let id = profile.id.clone();
        let instance = match self.entries.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                // A concurrent acquire won the insert; lease theirs and let
                // ours shut down on drop.
                occupied.get_mut().leases += 1;
                occupied.get().instance.clone()
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(PoolEntry {
                    instance: instance.clone(),
                    leases: 1,
                });
                instance
            }
        };

        Ok(Lease {
            id,
            instance,
            entries: self.entries.clone(),
        })
    }

    /// Active lease count for a profile id (0 if not pooled).
    pub fn lease_count(&self, id: &str) -> usize {
        self.entries.get(id).map_or(0, |entry| entry.leases)
    }

    async fn start(
        &self,
        profile: ModelProfile,
        settings: InstanceSettings,
    ) -> Result<Arc<Instance>, InstanceError> {
        let instance = (self.builder)(profile, settings);
        instance.load().wait_ready().await?;
        Ok(Arc::new(instance))
    }
}

impl Default for InstancePool {
    fn default() -> Self {
        Self::new()
    }
}

/// A counted lease on a pooled instance. Dereferences to [`Instance`];
/// dropping the last lease for an id shuts the instance down.
pub struct Lease {
    id: String,
    instance: Arc<Instance>,
    entries: Arc<DashMap<String, PoolEntry>>,
}

impl Deref for Lease {
    type Target = Instance;

    fn deref(&self) -> &Instance {
        &self.instance
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(mut entry) = self.entries.get_mut(&self.id) {
            entry.leases = entry.leases.saturating_sub(1);
        }
        let removed = self
            .entries
            .remove_if(&self.id, |_, entry| entry.leases == 0);
        if let Some((id, entry)) = removed {
            tracing::debug!("Last lease dropped; shutting down {}", id);
            entry.instance.shutdown();
        }
    }
}
