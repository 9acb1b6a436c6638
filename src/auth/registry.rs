// ABOUTME: Content-addressed, single-flight cache of realized credentials.
// ABOUTME: Builds the ordered auth set for every SSH hop of every selected route.

use super::material::{CredentialDescriptor, CredentialKey, CredentialMaterial, HostAuthSet};
use super::{CredentialError, Materializer};
use crate::config::{Config, HostProfile};
use crate::route::resolve_route;
use crate::types::HostName;
use futures::future::{BoxFuture, FutureExt, join_all};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::OnceCell;

type Realized = Result<Arc<CredentialMaterial>, Arc<CredentialError>>;
type Slot = Arc<OnceCell<Realized>>;

pub struct CredentialRegistry {
    materializer: Arc<dyn Materializer>,
    slots: Mutex<HashMap<CredentialKey, Slot>>,
}

impl CredentialRegistry {
    pub fn new(materializer: Arc<dyn Materializer>) -> Self {
        Self {
            materializer,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Number of distinct credentials requested so far.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    fn slot(&self, key: &CredentialKey) -> Slot {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// Realize a credential at most once. Concurrent callers for the same key
    /// wait on the first caller's result, failures included.
    pub fn resolve<'a>(&'a self, descriptor: &'a CredentialDescriptor) -> BoxFuture<'a, Realized> {
        async move {
            let key = descriptor.key();
            let slot = self.slot(&key);
            let key = &key;
            slot.get_or_init(|| async move {
                tracing::debug!(credential = %key, "materializing credential");
                self.materialize(descriptor).await.map(Arc::new).map_err(|e| {
                    tracing::warn!(credential = %key, error = %e, "credential unavailable");
                    Arc::new(e)
                })
            })
            .await
            .clone()
        }
        .boxed()
    }

    async fn materialize(
        &self,
        descriptor: &CredentialDescriptor,
    ) -> Result<CredentialMaterial, CredentialError> {
        let CredentialDescriptor::Certificate {
            cert,
            key,
            passphrase,
        } = descriptor
        else {
            return self.materializer.materialize(descriptor).await;
        };

        // The signing key shares the cache with plain key descriptors.
        let signer = CredentialDescriptor::Key {
            path: key.clone(),
            passphrase: passphrase.clone(),
        };
        let material = self
            .resolve(&signer)
            .await
            .map_err(|e| CredentialError::Certificate {
                path: cert.display().to_string(),
                reason: format!("signing key: {e}"),
            })?;

        match material.as_ref() {
            CredentialMaterial::PrivateKey(private) => {
                self.materializer.certificate(cert, Arc::clone(private)).await
            }
            other => Err(CredentialError::Certificate {
                path: cert.display().to_string(),
                reason: format!("signing key resolved to {other:?}"),
            }),
        }
    }

    /// Ordered credentials for one host. Descriptors that fail are recorded
    /// and skipped so the remaining ones can still be tried.
    pub async fn auth_set(&self, profile: &HostProfile) -> HostAuthSet {
        let mut set = HostAuthSet::default();
        for descriptor in CredentialDescriptor::from_settings(&profile.auth) {
            let key = descriptor.key();
            match self.resolve(&descriptor).await {
                Ok(material) => set.push(key, material),
                Err(error) => set.push_failure(key, error),
            }
        }
        set.finish()
    }

    /// Auth sets for every SSH hop named in any route to `hosts`, including
    /// intermediate jump hosts.
    pub async fn build(
        &self,
        hosts: &[HostName],
        config: &Config,
    ) -> crate::error::Result<HashMap<HostName, HostAuthSet>> {
        let mut names = BTreeSet::new();
        for host in hosts {
            let route = resolve_route(host.as_str(), config)?;
            names.extend(route.ssh_hosts().cloned());
        }

        let profiles = names
            .iter()
            .map(|name| config.host(name.as_str()))
            .collect::<crate::error::Result<Vec<_>>>()?;

        let sets = join_all(profiles.iter().map(|profile| self.auth_set(profile))).await;

        Ok(profiles
            .into_iter()
            .map(|profile| profile.name.clone())
            .zip(sets)
            .collect())
    }
}
