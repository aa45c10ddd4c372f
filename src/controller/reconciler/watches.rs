//! # Secondary Watches
//!
//! Output Secrets are watched so external edits and deletions are repaired:
//! a modified Secret requeues its owner after a short delay, a deleted one
//! requeues any DockhandSecret that renders it after a longer delay.
//!
//! Workloads carrying the auto-update label are watched so a Deployment
//! created before its Secret still ends up with the right checksum.

use crate::config::ControllerConfig;
use crate::constants::{AUTO_UPDATE_LABEL_KEY, OWNER_LABEL_KEY};
use crate::crd::DockhandSecret;
use crate::propagation::{SecretLookup, Workload, sync_workload};
use futures::StreamExt;
use futures::channel::mpsc::UnboundedSender;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Secret;
use kube_runtime::reflector::{ObjectRef, Store};
use kube_runtime::{WatchStreamExt, watcher};
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Owner of a modified output Secret, from its back-reference label
#[must_use]
pub fn owner_of(secret: &Secret) -> Option<ObjectRef<DockhandSecret>> {
    let owner = secret.labels().get(OWNER_LABEL_KEY)?;
    let namespace = secret.namespace()?;
    Some(ObjectRef::new(owner).within(&namespace))
}

/// DockhandSecrets in the Secret's namespace that render a Secret of that name
/// and are not being deleted
pub fn renderers_of<'a>(
    candidates: impl IntoIterator<Item = &'a DockhandSecret>,
    secret: &Secret,
) -> Vec<ObjectRef<DockhandSecret>> {
    let namespace = secret.namespace();
    let name = secret.name_any();
    candidates
        .into_iter()
        .filter(|ds| ds.namespace() == namespace)
        .filter(|ds| ds.spec.secret_spec.name == name)
        .filter(|ds| ds.metadata.deletion_timestamp.is_none())
        .map(ObjectRef::from_obj)
        .collect()
}

fn enqueue_after(
    tx: &UnboundedSender<ObjectRef<DockhandSecret>>,
    target: ObjectRef<DockhandSecret>,
    delay: Duration,
) {
    let tx = tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if tx.unbounded_send(target).is_err() {
            debug!("Controller stopped before delayed requeue");
        }
    });
}

/// Watch output Secrets and feed delayed requeues into `tx`
pub fn spawn_output_secret_watch(
    api: Api<Secret>,
    store: Store<DockhandSecret>,
    tx: UnboundedSender<ObjectRef<DockhandSecret>>,
    config: &ControllerConfig,
) -> JoinHandle<()> {
    let changed_delay = config.sync_changed_delay();
    let recreate_delay = config.recreate_delay();
    let cfg = watcher::Config::default().labels(OWNER_LABEL_KEY);

    tokio::spawn(async move {
        info!("Watching output Secrets");
        let mut stream = watcher(api, cfg).default_backoff().boxed();
        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Apply(secret)) => {
                    if let Some(owner) = owner_of(&secret) {
                        debug!(secret = %secret.name_any(), owner = %owner.name, "Output Secret changed");
                        enqueue_after(&tx, owner, changed_delay);
                    }
                }
                Ok(watcher::Event::Delete(secret)) => {
                    let state = store.state();
                    for target in renderers_of(state.iter().map(Arc::as_ref), &secret) {
                        info!(secret = %secret.name_any(), owner = %target.name, "Output Secret deleted, scheduling recreate");
                        enqueue_after(&tx, target, recreate_delay);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Output Secret watch error"),
            }
        }
        warn!("Output Secret watch ended");
    })
}

async fn watch_workloads<W: Workload>(
    client: Client,
    namespace: Option<String>,
    lookup: Arc<dyn SecretLookup>,
) {
    let api: Api<W> = match namespace.as_deref() {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let cfg = watcher::Config::default().labels(&format!("{AUTO_UPDATE_LABEL_KEY}=true"));

    info!(workload.kind = W::KIND, "Watching auto-update workloads");
    let mut stream = watcher(api, cfg).default_backoff().applied_objects().boxed();
    while let Some(event) = stream.next().await {
        let workload = match event {
            Ok(workload) => workload,
            Err(e) => {
                warn!(workload.kind = W::KIND, error = %e, "Workload watch error");
                continue;
            }
        };
        let Some(ns) = workload.namespace() else {
            continue;
        };
        let api: Api<W> = Api::namespaced(client.clone(), &ns);
        if let Err(e) = sync_workload(&api, lookup.as_ref(), &workload).await {
            warn!(
                workload.kind = W::KIND,
                resource.name = %workload.name_any(),
                resource.namespace = %ns,
                error = %e,
                "Unable to refresh workload"
            );
        }
    }
    warn!(workload.kind = W::KIND, "Workload watch ended");
}

/// Start one watch per workload kind
pub fn spawn_workload_watches(
    client: &Client,
    namespace: Option<&str>,
    lookup: &Arc<dyn SecretLookup>,
) -> Vec<JoinHandle<()>> {
    let namespace = namespace.map(str::to_string);
    vec![
        tokio::spawn(watch_workloads::<Deployment>(
            client.clone(),
            namespace.clone(),
            Arc::clone(lookup),
        )),
        tokio::spawn(watch_workloads::<DaemonSet>(
            client.clone(),
            namespace.clone(),
            Arc::clone(lookup),
        )),
        tokio::spawn(watch_workloads::<StatefulSet>(
            client.clone(),
            namespace,
            Arc::clone(lookup),
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{DockhandSecretSpec, ProfileRef, SecretSpec};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn secret(name: &str, namespace: &str, owner: Option<&str>) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: owner.map(|o| BTreeMap::from([(OWNER_LABEL_KEY.to_string(), o.to_string())])),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn dhs(name: &str, namespace: &str, output: &str) -> DockhandSecret {
        let mut ds = DockhandSecret::new(
            name,
            DockhandSecretSpec {
                sync_interval: None,
                data: BTreeMap::new(),
                secret_spec: SecretSpec {
                    name: output.to_string(),
                    type_: "Opaque".to_string(),
                    labels: BTreeMap::new(),
                    annotations: BTreeMap::new(),
                },
                profile: ProfileRef {
                    name: "p".to_string(),
                    namespace: None,
                },
            },
        );
        ds.metadata.namespace = Some(namespace.to_string());
        ds
    }

    #[test]
    fn test_owner_from_label() {
        let owner = owner_of(&secret("db", "apps", Some("db-creds"))).unwrap();
        assert_eq!(owner.name, "db-creds");
        assert_eq!(owner.namespace.as_deref(), Some("apps"));
        assert!(owner_of(&secret("db", "apps", None)).is_none());
    }

    #[test]
    fn test_renderers_match_namespace_and_name() {
        let mut deleting = dhs("old", "apps", "db");
        deleting.metadata.deletion_timestamp =
            serde_json::from_value(serde_json::json!("2024-05-01T12:00:00Z")).unwrap();

        let candidates = [
            dhs("db-creds", "apps", "db"),
            dhs("other", "apps", "cache"),
            dhs("db-creds", "staging", "db"),
            deleting,
        ];
        let targets = renderers_of(candidates.iter(), &secret("db", "apps", None));
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name, "db-creds");
        assert_eq!(targets[0].namespace.as_deref(), Some("apps"));
    }
}
