//! # Profile Resolver
//!
//! Looks up DockhandProfiles from a reflector cache, falling back to a direct
//! GET while the cache is still warming up. The resolver only fetches;
//! whether a DockhandSecret may use a profile is decided by the caller.

use crate::crd::DockhandProfile;
use crate::provider::FetcherRegistry;
use futures::StreamExt;
use kube_runtime::reflector::{self, ObjectRef, Store};
use kube_runtime::{WatchStreamExt, watcher};
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    #[error("unable to load profile: {0}")]
    Kube(#[from] kube::Error),
}

#[derive(Clone)]
pub struct ProfileResolver {
    client: Client,
    store: Option<Store<DockhandProfile>>,
}

impl std::fmt::Debug for ProfileResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileResolver")
            .field("cached", &self.store.as_ref().map(|s| s.state().len()))
            .finish_non_exhaustive()
    }
}

impl ProfileResolver {
    /// Resolver without a cache; every lookup is a GET
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            store: None,
        }
    }

    /// Start a profile reflector and return a resolver reading from it
    ///
    /// Deleted profiles have their backend clients dropped from `registry`.
    #[must_use]
    pub fn spawn(client: Client, namespace: Option<&str>, registry: Arc<FetcherRegistry>) -> Self {
        let api: Api<DockhandProfile> = match namespace {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        };
        let (reader, writer) = reflector::store();
        let stream = reflector::reflector(writer, watcher(api, watcher::Config::default()))
            .default_backoff();

        tokio::spawn(async move {
            info!("Starting profile reflector");
            stream
                .for_each(|event| {
                    match event {
                        Ok(watcher::Event::Delete(profile)) => {
                            let ns = profile.namespace().unwrap_or_default();
                            debug!(profile = %profile.name_any(), resource.namespace = %ns, "Profile deleted, dropping cached clients");
                            registry.invalidate(&ns, &profile.name_any());
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Profile watch error"),
                    }
                    futures::future::ready(())
                })
                .await;
            warn!("Profile reflector stopped");
        });

        Self {
            client,
            store: Some(reader),
        }
    }

    pub async fn get(&self, namespace: &str, name: &str) -> Result<Arc<DockhandProfile>, ProfileError> {
        if let Some(store) = &self.store {
            if let Some(profile) = store.get(&ObjectRef::new(name).within(namespace)) {
                return Ok(profile);
            }
        }

        debug!(profile = %name, resource.namespace = %namespace, "Profile not cached, fetching");
        let api: Api<DockhandProfile> = Api::namespaced(self.client.clone(), namespace);
        match api.get_opt(name).await? {
            Some(profile) => Ok(Arc::new(profile)),
            None => Err(ProfileError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
        }
    }
}
