//! Workload kinds and cluster-side patching.

use super::{
    PropagationError, PropagationOptions, collect_secret_names, derive_metadata,
    secret_names_from_annotations, workload_patch, SecretLookup,
};
use crate::constants::{AUTO_UPDATE_LABEL_KEY, SECRET_LABEL_PREFIX};
use crate::observability::metrics;
use json_patch::Patch;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::api::{ListParams, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// A pod-owning workload the engine can patch
pub trait Workload:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + DeserializeOwned
    + Serialize
    + std::fmt::Debug
    + Send
    + Sync
    + 'static
{
    const KIND: &'static str;

    fn pod_template(&self) -> Option<&PodTemplateSpec>;
}

macro_rules! impl_workload {
    ($($ty:ty => $kind:literal),+ $(,)?) => {
        $(
            impl Workload for $ty {
                const KIND: &'static str = $kind;

                fn pod_template(&self) -> Option<&PodTemplateSpec> {
                    self.spec.as_ref().map(|s| &s.template)
                }
            }
        )+
    };
}

impl_workload! {
    Deployment => "Deployment",
    DaemonSet => "DaemonSet",
    StatefulSet => "StatefulSet",
}

/// Controller gate: the auto-update label must be exactly `"true"`
#[must_use]
pub fn auto_update_enabled(labels: &BTreeMap<String, String>) -> bool {
    labels.get(AUTO_UPDATE_LABEL_KEY).is_some_and(|v| v == "true")
}

/// Webhook gate: the auto-update label only has to be present
#[must_use]
pub fn auto_update_requested(labels: &BTreeMap<String, String>) -> bool {
    labels.contains_key(AUTO_UPDATE_LABEL_KEY)
}

/// Compute the patch that brings `workload` up to date.
///
/// Returns `None` when nothing would change, when the workload has no pod
/// template, or when the checksum came back empty.
pub async fn plan_patch<W: Workload>(
    lookup: &dyn SecretLookup,
    workload: &W,
    options: &PropagationOptions,
) -> Result<Option<Patch>, PropagationError> {
    let Some(template) = workload.pod_template() else {
        return Ok(None);
    };
    let namespace = workload.namespace().unwrap_or_default();
    let template_annotations = template.metadata.as_ref().and_then(|m| m.annotations.as_ref());

    let secret_names = options
        .prefer_annotation
        .then(|| secret_names_from_annotations(template_annotations))
        .flatten()
        .or_else(|| template.spec.as_ref().map(collect_secret_names))
        .unwrap_or_default();

    let derived = derive_metadata(
        lookup,
        &namespace,
        workload.labels(),
        template_annotations.unwrap_or(&BTreeMap::new()),
        &secret_names,
        &options.retry,
    )
    .await?;

    if derived.checksum.is_empty() && !options.retry.empty_on_exhaustion {
        return Ok(None);
    }

    let patch = workload_patch(
        workload.meta().labels.as_ref(),
        &derived.labels,
        template.metadata.as_ref(),
        &derived.annotations,
    );
    Ok((!patch.0.is_empty()).then_some(patch))
}

/// Re-derive and apply metadata for one workload. Returns whether it was patched.
pub async fn sync_workload<W: Workload>(
    api: &Api<W>,
    lookup: &dyn SecretLookup,
    workload: &W,
) -> Result<bool, PropagationError> {
    if !auto_update_enabled(workload.labels()) {
        return Ok(false);
    }

    let name = workload.name_any();
    let Some(patch) = plan_patch(lookup, workload, &PropagationOptions::controller()).await? else {
        debug!(workload.kind = W::KIND, resource.name = %name, "Workload already up to date");
        return Ok(false);
    };

    api.patch(&name, &PatchParams::default(), &kube::api::Patch::Json::<()>(patch))
        .await?;
    metrics::increment_workloads_patched(W::KIND);
    info!(
        workload.kind = W::KIND,
        resource.name = %name,
        resource.namespace = ?workload.namespace(),
        "Patched workload secret checksum"
    );
    Ok(true)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PropagationSummary {
    pub patched: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl PropagationSummary {
    fn absorb(&mut self, other: PropagationSummary) {
        self.patched += other.patched;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
    }
}

async fn propagate_kind<W: Workload>(
    client: &Client,
    lookup: &dyn SecretLookup,
    namespace: &str,
    selector: &str,
) -> PropagationSummary {
    let api: Api<W> = Api::namespaced(client.clone(), namespace);
    let mut summary = PropagationSummary::default();

    let workloads = match api.list(&ListParams::default().labels(selector)).await {
        Ok(list) => list,
        Err(e) => {
            warn!(workload.kind = W::KIND, resource.namespace = %namespace, error = %e, "Unable to list workloads");
            summary.failed += 1;
            return summary;
        }
    };

    for workload in &workloads.items {
        match sync_workload(&api, lookup, workload).await {
            Ok(true) => summary.patched += 1,
            Ok(false) => summary.unchanged += 1,
            Err(e) => {
                warn!(
                    workload.kind = W::KIND,
                    resource.name = %workload.name_any(),
                    resource.namespace = %namespace,
                    error = %e,
                    "Unable to update workload"
                );
                summary.failed += 1;
            }
        }
    }
    summary
}

/// Refresh every workload labelled as depending on the DockhandSecret `owner`.
///
/// Failures are logged and counted; they never fail the caller.
pub async fn propagate_to_dependents(
    client: &Client,
    lookup: &dyn SecretLookup,
    namespace: &str,
    owner: &str,
) -> PropagationSummary {
    let selector = format!("{SECRET_LABEL_PREFIX}{owner}");
    let mut summary = PropagationSummary::default();
    summary.absorb(propagate_kind::<Deployment>(client, lookup, namespace, &selector).await);
    summary.absorb(propagate_kind::<DaemonSet>(client, lookup, namespace, &selector).await);
    summary.absorb(propagate_kind::<StatefulSet>(client, lookup, namespace, &selector).await);
    summary
}
