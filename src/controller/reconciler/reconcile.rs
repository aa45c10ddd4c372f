//! # Reconcile
//!
//! Entry point invoked by the controller runtime for each DockhandSecret.

use super::output_secret::{WriteOutcome, build_output_secret, write_output_secret};
use super::sync::{SyncPlan, has_drifted, plan, should_mark_pending, sync_interval};
use super::{EventPublisher, Reconciler, ReconcilerError, access, events, status};
use crate::constants::FINALIZER;
use crate::crd::{DockhandSecret, SecretState};
use crate::observability::metrics;
use crate::propagation::{PropagationSummary, propagate_to_dependents};
use crate::template::render_data;
use k8s_openapi::api::core::v1::Secret;
use kube::api::DeleteParams;
use kube_runtime::controller::Action;
use kube_runtime::events::EventType;
use kube_runtime::finalizer::{Event as FinalizerEvent, finalizer};
use kube::{Api, Resource, ResourceExt};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, debug, info, info_span, warn};

/// Reconcile one DockhandSecret
pub async fn reconcile(
    ds: Arc<DockhandSecret>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    metrics::increment_reconciliations();

    let namespace = ds
        .namespace()
        .ok_or(ReconcilerError::MissingObjectKey(".metadata.namespace"))?;
    let name = ds.name_any();
    let api: Api<DockhandSecret> = Api::namespaced(ctx.client.clone(), &namespace);

    let span = info_span!(
        "reconcile",
        resource.name = %name,
        resource.namespace = %namespace,
        resource.generation = ?ds.metadata.generation,
    );

    let (ctx_ref, api_ref) = (&ctx, &api);
    let result = finalizer(&api, FINALIZER, ds, |event| async move {
        match event {
            FinalizerEvent::Apply(ds) => apply(&ds, ctx_ref, api_ref).await,
            FinalizerEvent::Cleanup(ds) => cleanup(&ds, ctx_ref).await,
        }
    })
    .instrument(span)
    .await
    .map_err(|e| ReconcilerError::Finalizer(Box::new(e)));

    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
    if result.is_ok() && ctx.reset_backoff(&format!("{namespace}/{name}")) {
        info!(resource.name = %name, resource.namespace = %namespace, "Backoff reset after successful reconcile");
    }
    result
}

async fn apply(
    ds: &DockhandSecret,
    ctx: &Reconciler,
    api: &Api<DockhandSecret>,
) -> Result<Action, ReconcilerError> {
    let namespace = ds
        .namespace()
        .ok_or(ReconcilerError::MissingObjectKey(".metadata.namespace"))?;
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &namespace);

    let next = match plan(ds, chrono::Utc::now(), ctx.config.min_requeue()) {
        SyncPlan::Wait(remaining) => {
            debug!(requeue_secs = remaining.as_secs(), "Sync interval not elapsed");
            metrics::increment_requeues("sync-interval");
            return Ok(Action::requeue(remaining));
        }
        SyncPlan::CheckDrift => {
            let live = secrets.get_opt(&ds.spec.secret_spec.name).await?;
            let observed = ds
                .status
                .as_ref()
                .and_then(|s| s.observed_secret_resource_version.as_deref());
            if !has_drifted(observed, live.as_ref().and_then(|s| s.metadata.resource_version.as_deref())) {
                debug!("Output Secret matches last write");
                return Ok(Action::await_change());
            }
            info!(secret = %ds.spec.secret_spec.name, "Output Secret changed or missing, re-rendering");
            None
        }
        SyncPlan::Resync { interval } => {
            info!(interval_secs = interval.as_secs(), "Sync interval elapsed, re-rendering");
            Some(interval)
        }
        SyncPlan::Full => {
            if should_mark_pending(ds) {
                status::set_state(api, &ds.name_any(), SecretState::Pending).await?;
            }
            sync_interval(ds)
        }
    };

    match sync_output_secret(ds, ctx, &namespace, &secrets).await {
        Ok(written) => {
            let name = ds.name_any();
            let ready = status::ready_status(
                ds.metadata.generation,
                written.resource_version(),
                chrono::Utc::now(),
            );
            let (status_result, summary) = mark_ready_then_propagate(
                status::patch_status(api, &name, &ready),
                propagate_to_dependents(&ctx.client, ctx.secret_lookup.as_ref(), &namespace, &name),
            )
            .await;
            if summary.patched > 0 || summary.failed > 0 {
                info!(
                    patched = summary.patched,
                    unchanged = summary.unchanged,
                    failed = summary.failed,
                    "Dependent workloads refreshed"
                );
            }
            // Retry so Ready is eventually recorded; the Secret itself is already written
            status_result?;

            Ok(requeue_after(next))
        }
        Err(err) => {
            report_failure(ctx.events.as_ref(), ds, &err).await;
            if let Err(e) = status::set_state(api, &ds.name_any(), SecretState::ErrApplied).await {
                warn!(error = %e, "Unable to record ErrApplied status");
            }
            Err(err)
        }
    }
}

/// Record Ready, then refresh dependent workloads
///
/// A failed status write is logged and handed back, but dependents are
/// refreshed either way since the output Secret has already changed.
async fn mark_ready_then_propagate<S, P, E>(
    mark_ready: S,
    propagate: P,
) -> (Result<(), E>, PropagationSummary)
where
    S: Future<Output = Result<(), E>>,
    P: Future<Output = PropagationSummary>,
    E: std::fmt::Display,
{
    let status_result = mark_ready.await;
    if let Err(e) = &status_result {
        warn!(error = %e, "Unable to record Ready status");
    }
    (status_result, propagate.await)
}

fn requeue_after(interval: Option<Duration>) -> Action {
    match interval {
        Some(interval) => Action::requeue(interval),
        None => Action::await_change(),
    }
}

/// Render and write the output Secret, returning it as stored by the API server
async fn sync_output_secret(
    ds: &DockhandSecret,
    ctx: &Reconciler,
    namespace: &str,
    secrets: &Api<Secret>,
) -> Result<Secret, ReconcilerError> {
    let profile_ns =
        access::authorize_profile(namespace, &ds.spec.profile, ctx.options.allow_cross_namespace)?;
    let profile = ctx.profiles.get(profile_ns, &ds.spec.profile.name).await?;
    let fetchers = ctx.registry.get_or_create(&profile).await?;

    let secret_name = &ds.spec.secret_spec.name;
    let existing = secrets.get_opt(secret_name).await?;

    let data = render_data(&ds.spec.data, &fetchers, &ctx.options.delimiters).await?;
    let desired = build_output_secret(existing, ds, namespace, data);

    let (written, outcome) =
        write_output_secret(secrets, &desired)
            .await
            .map_err(|source| ReconcilerError::Write {
                namespace: namespace.to_string(),
                name: secret_name.clone(),
                source,
            })?;

    if outcome == WriteOutcome::Unchanged {
        debug!(secret = %secret_name, "Output Secret already up to date");
    } else {
        let note = format!("Secret {namespace}/{secret_name} {}", outcome.verb());
        info!(secret = %secret_name, outcome = outcome.verb(), "Output Secret written");
        ctx.events
            .publish(
                &ds.object_ref(&()),
                EventType::Normal,
                events::reasons::SUCCESS,
                events::actions::WRITE_SECRET,
                Some(note),
            )
            .await;
    }
    Ok(written)
}

/// Publish the Warning event matching `err`
pub(crate) async fn report_failure(
    publisher: &dyn EventPublisher,
    ds: &DockhandSecret,
    err: &ReconcilerError,
) {
    warn!(reason = err.event_reason(), error = %err, "Reconcile failed");
    publisher
        .publish(
            &ds.object_ref(&()),
            EventType::Warning,
            err.event_reason(),
            events::actions::RECONCILE,
            Some(err.to_string()),
        )
        .await;
}

/// Remove the output Secret; already gone is fine
async fn cleanup(ds: &DockhandSecret, ctx: &Reconciler) -> Result<Action, ReconcilerError> {
    let namespace = ds
        .namespace()
        .ok_or(ReconcilerError::MissingObjectKey(".metadata.namespace"))?;
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &namespace);
    let secret_name = &ds.spec.secret_spec.name;

    match secrets.delete(secret_name, &DeleteParams::default()).await {
        Ok(_) => info!(secret = %secret_name, "Deleted output Secret"),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            debug!(secret = %secret_name, "Output Secret already deleted");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(Action::await_change())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::reconciler::ProfileError;
    use crate::controller::reconciler::events::testing::RecordingEventPublisher;
    use crate::crd::{DockhandSecretSpec, ProfileRef, SecretSpec};
    use crate::template::TemplateError;

    fn dhs() -> DockhandSecret {
        let mut ds = DockhandSecret::new(
            "creds",
            DockhandSecretSpec {
                sync_interval: None,
                data: Default::default(),
                secret_spec: SecretSpec {
                    name: "out".to_string(),
                    type_: "Opaque".to_string(),
                    labels: Default::default(),
                    annotations: Default::default(),
                },
                profile: ProfileRef {
                    name: "p".to_string(),
                    namespace: None,
                },
            },
        );
        ds.metadata.namespace = Some("apps".to_string());
        ds
    }

    #[tokio::test]
    async fn test_failures_publish_matching_warning() {
        let publisher = RecordingEventPublisher::default();
        let ds = dhs();

        report_failure(
            &publisher,
            &ds,
            &ReconcilerError::Profile(ProfileError::NotFound {
                namespace: "apps".to_string(),
                name: "p".to_string(),
            }),
        )
        .await;
        report_failure(
            &publisher,
            &ds,
            &ReconcilerError::Template(TemplateError::UnknownFunction("nope".to_string())),
        )
        .await;

        assert_eq!(publisher.reasons(), vec!["ErrLoadingProfile", "ErrParsingSecret"]);
        let events = publisher.events.lock().unwrap();
        assert!(events.iter().all(|(t, _, _)| *t == EventType::Warning));
        assert!(events[0].2.as_deref().unwrap().contains("apps/p"));
    }

    #[tokio::test]
    async fn test_status_failure_still_propagates() {
        let propagated = std::sync::atomic::AtomicBool::new(false);
        let (status_result, summary) = mark_ready_then_propagate(
            async { Err("the object has been modified") },
            async {
                propagated.store(true, std::sync::atomic::Ordering::SeqCst);
                PropagationSummary {
                    patched: 2,
                    ..Default::default()
                }
            },
        )
        .await;

        assert!(propagated.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(summary.patched, 2);
        assert_eq!(status_result, Err("the object has been modified"));
    }

    #[tokio::test]
    async fn test_ready_then_propagate() {
        let (status_result, summary) = mark_ready_then_propagate(
            async { Ok::<(), kube::Error>(()) },
            async { PropagationSummary::default() },
        )
        .await;
        assert!(status_result.is_ok());
        assert_eq!(summary, PropagationSummary::default());
    }

    #[test]
    fn test_requeue_after_interval() {
        assert_eq!(
            requeue_after(Some(Duration::from_secs(60))),
            Action::requeue(Duration::from_secs(60))
        );
        assert_eq!(requeue_after(None), Action::await_change());
    }
}
