//! # Leader Election
//!
//! Lease-based leader election for the certificate manager so that only one
//! webhook replica issues certificates at a time.
//!
//! Writes carry the lease's resourceVersion, so if the lease changed between
//! read and write the update fails with 409 Conflict and the attempt is
//! treated as lost.

use crate::config::CertManagerConfig;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{ObjectMeta, PostParams};
use kube::{Api, Client};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LeaderElectionError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("lease {0} has no resourceVersion")]
    MissingResourceVersion(String),

    #[error("invalid lease timestamp: {0}")]
    Timestamp(#[from] serde_json::Error),
}

// MicroTime wraps a different timestamp type depending on the k8s-openapi
// release, so convert through its RFC 3339 wire form.
fn micro_time(at: DateTime<Utc>) -> Result<MicroTime, LeaderElectionError> {
    Ok(serde_json::from_value(serde_json::Value::String(
        at.to_rfc3339_opts(SecondsFormat::Micros, true),
    ))?)
}

fn parse_micro_time(t: &MicroTime) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(t).ok()?;
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// A lease whose holder stopped renewing (or never recorded timing) is up for grabs
#[must_use]
pub fn lease_expired(
    renew_time: Option<DateTime<Utc>>,
    duration_secs: Option<i32>,
    now: DateTime<Utc>,
) -> bool {
    match (renew_time, duration_secs) {
        (Some(renewed), Some(secs)) => now > renewed + chrono::Duration::seconds(i64::from(secs)),
        _ => true,
    }
}

pub struct LeaderElector {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
    lease_duration: Duration,
    renew_interval: Duration,
    retry_interval: Duration,
}

impl std::fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector")
            .field("lease_name", &self.lease_name)
            .field("namespace", &self.namespace)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl LeaderElector {
    #[must_use]
    pub fn new(
        client: Client,
        lease_name: &str,
        namespace: &str,
        identity: &str,
        config: &CertManagerConfig,
    ) -> Self {
        Self {
            client,
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            lease_duration: config.lease_duration,
            renew_interval: config.renew_interval,
            retry_interval: config.retry_interval,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Block until leadership is acquired
    ///
    /// The returned guard keeps renewing the lease in the background and
    /// signals through [`LeaderGuard::lost`] when a renewal fails.
    pub async fn acquire(self: Arc<Self>) -> LeaderGuard {
        info!(identity = %self.identity, lease = %self.lease_name, "Waiting for leadership");
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, lease = %self.lease_name, "Leadership acquired");
                    return self.create_guard();
                }
                Ok(false) => {
                    debug!(identity = %self.identity, "Lease held by another replica");
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "Failed to acquire lease, retrying");
                }
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    fn create_guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = watch::channel(false);
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move {
            elector.renewal_loop(lost_tx).await;
        });
        LeaderGuard {
            identity: self.identity.clone(),
            renewal_task,
            lost_rx,
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Utc::now();

        let Some(lease) = api.get_opt(&self.lease_name).await? else {
            return self.create_lease(&api, now).await;
        };

        let spec = lease.spec.as_ref();
        let holder = spec.and_then(|s| s.holder_identity.as_deref());
        if holder == Some(self.identity.as_str()) {
            return self.renew_lease(&api, &lease, now).await;
        }

        let renewed = spec.and_then(|s| s.renew_time.as_ref()).and_then(parse_micro_time);
        let duration = spec.and_then(|s| s.lease_duration_seconds);
        if !lease_expired(renewed, duration, now) {
            return Ok(false);
        }

        let transitions = spec.and_then(|s| s.lease_transitions).unwrap_or(0);
        self.take_over_lease(&api, &lease, now, transitions).await
    }

    fn lease_spec(&self, now: DateTime<Utc>, transitions: i32) -> Result<LeaseSpec, LeaderElectionError> {
        Ok(LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(i32::try_from(self.lease_duration.as_secs()).unwrap_or(i32::MAX)),
            acquire_time: Some(micro_time(now)?),
            renew_time: Some(micro_time(now)?),
            lease_transitions: Some(transitions),
            ..Default::default()
        })
    }

    async fn create_lease(&self, api: &Api<Lease>, now: DateTime<Utc>) -> Result<bool, LeaderElectionError> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(self.lease_spec(now, 0)?),
        };

        match api.create(&PostParams::default(), &lease).await {
            Ok(_) => {
                info!(identity = %self.identity, "Created lease");
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.identity, "Lease created concurrently by another replica");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn renew_lease(
        &self,
        api: &Api<Lease>,
        existing: &Lease,
        now: DateTime<Utc>,
    ) -> Result<bool, LeaderElectionError> {
        if existing.metadata.resource_version.is_none() {
            return Err(LeaderElectionError::MissingResourceVersion(self.lease_name.clone()));
        }
        let mut updated = existing.clone();
        if let Some(spec) = updated.spec.as_mut() {
            spec.renew_time = Some(micro_time(now)?);
        }
        self.replace(api, &updated, "Lease renewal conflict").await
    }

    async fn take_over_lease(
        &self,
        api: &Api<Lease>,
        existing: &Lease,
        now: DateTime<Utc>,
        transitions: i32,
    ) -> Result<bool, LeaderElectionError> {
        let resource_version = existing
            .metadata
            .resource_version
            .clone()
            .ok_or_else(|| LeaderElectionError::MissingResourceVersion(self.lease_name.clone()))?;

        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version: Some(resource_version),
                ..Default::default()
            },
            spec: Some(self.lease_spec(now, transitions.saturating_add(1))?),
        };
        let taken = self.replace(api, &lease, "Lease takeover conflict").await?;
        if taken {
            info!(identity = %self.identity, transitions = transitions.saturating_add(1), "Took over expired lease");
        }
        Ok(taken)
    }

    async fn replace(&self, api: &Api<Lease>, lease: &Lease, conflict: &str) -> Result<bool, LeaderElectionError> {
        match api.replace(&self.lease_name, &PostParams::default(), lease).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.identity, "{}", conflict);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn renewal_loop(&self, lost_tx: watch::Sender<bool>) {
        loop {
            tokio::time::sleep(self.renew_interval).await;
            match self.try_acquire_or_renew().await {
                Ok(true) => debug!(identity = %self.identity, "Lease renewed"),
                Ok(false) | Err(_) => {
                    warn!(identity = %self.identity, "Leadership lost");
                    let _ = lost_tx.send(true);
                    return;
                }
            }
        }
    }
}

/// Held while this replica is leader; dropping it stops renewal
pub struct LeaderGuard {
    identity: String,
    renewal_task: JoinHandle<()>,
    lost_rx: watch::Receiver<bool>,
}

impl std::fmt::Debug for LeaderGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderGuard")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl LeaderGuard {
    /// Resolves once a renewal fails
    ///
    /// Safe to call again after being cancelled in a `select!`: the loss is
    /// kept in the channel state, not consumed.
    pub async fn lost(&mut self) {
        // A closed channel means the renewal task is gone, which is a loss too
        let _ = self.lost_rx.wait_for(|lost| *lost).await;
    }
}

/// Call `on_tick` immediately and then every `period` until leadership is lost
pub async fn while_leader<F, Fut>(guard: &mut LeaderGuard, period: Duration, mut on_tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            () = guard.lost() => return,
            _ = ticker.tick() => on_tick().await,
        }
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.renewal_task.abort();
        debug!(identity = %self.identity, "Stopped lease renewal");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_lease_live_within_duration() {
        assert!(!lease_expired(Some(at(0)), Some(15), at(10)));
        assert!(!lease_expired(Some(at(0)), Some(15), at(15)));
    }

    #[test]
    fn test_lease_expired_after_duration() {
        assert!(lease_expired(Some(at(0)), Some(15), at(16)));
    }

    #[test]
    fn test_lease_without_timing_is_expired() {
        assert!(lease_expired(None, Some(15), at(0)));
        assert!(lease_expired(Some(at(0)), None, at(0)));
    }

    fn guard() -> (watch::Sender<bool>, LeaderGuard) {
        let (tx, rx) = watch::channel(false);
        let guard = LeaderGuard {
            identity: "replica-a".to_string(),
            renewal_task: tokio::spawn(futures::future::pending::<()>()),
            lost_rx: rx,
        };
        (tx, guard)
    }

    #[tokio::test]
    async fn test_loss_after_tick_stops_the_loop() {
        let (tx, mut guard) = guard();
        let ticks = std::sync::atomic::AtomicUsize::new(0);

        let finished = tokio::time::timeout(
            Duration::from_secs(2),
            while_leader(&mut guard, Duration::from_secs(3600), || {
                // The first tick wins the select, then the lease is lost
                if ticks.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                    tx.send(true).unwrap();
                }
                std::future::ready(())
            }),
        )
        .await;

        assert!(finished.is_ok(), "loop kept running after leadership loss");
        assert_eq!(ticks.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lost_survives_cancellation() {
        let (tx, mut guard) = guard();
        tokio::select! {
            () = guard.lost() => panic!("not lost yet"),
            () = tokio::time::sleep(Duration::from_millis(10)) => {}
        }
        tx.send(true).unwrap();
        let observed = tokio::time::timeout(Duration::from_secs(2), guard.lost()).await;
        assert!(observed.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_renewal_counts_as_lost() {
        let (tx, mut guard) = guard();
        drop(tx);
        let observed = tokio::time::timeout(Duration::from_secs(2), guard.lost()).await;
        assert!(observed.is_ok());
    }

    #[test]
    fn test_micro_time_round_trip() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let parsed = parse_micro_time(&micro_time(now).unwrap()).unwrap();
        assert_eq!(parsed, now);
    }
}
