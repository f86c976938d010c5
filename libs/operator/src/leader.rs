use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Parameters for the `coordination.k8s.io/v1` Lease backing leader
/// election. Multiple operator replicas race for the same lease; only the
/// holder runs the controllers.
pub struct LeaderElectionConfig {
    pub namespace: String,
    pub lease_name: String,
    pub holder_id: String,
    pub lease_ttl: Duration,
    pub renew_every: Duration,
}

impl LeaderElectionConfig {
    /// Builds a config from the Downward API's `POD_NAME`/`HOSTNAME`, with a
    /// pid-qualified fallback for local runs outside a Pod.
    pub fn from_env(lease_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let holder_id = std::env::var("POD_NAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| format!("storm-operator-{}", std::process::id()));
        Self {
            namespace: namespace.into(),
            lease_name: lease_name.into(),
            holder_id,
            lease_ttl: Duration::from_secs(15),
            renew_every: Duration::from_secs(5),
        }
    }
}

/// Why [`run_while_leader`] returned.
///
/// A caller must treat these differently: a clean `Shutdown` is a normal
/// exit, while `LeaseLost` means this process can no longer be trusted to be
/// the sole reconciler and must not keep running in any capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderExit {
    Shutdown,
    LeaseLost,
}

/// Runs the future produced by `spawn` only while this process holds the
/// named Lease. The task is aborted the moment leadership is lost (or a
/// renewal attempt fails, since we cannot tell "lost the lease" apart from
/// "lost contact with the apiserver" and must assume the worse of the two).
///
/// Unlike a simple retry loop, this never attempts to reacquire leadership
/// in-process once it has been lost: a process that briefly loses contact
/// with the apiserver cannot be sure another replica hasn't already taken
/// over, so it must exit and let its supervisor restart it.
///
/// Returns [`LeaderExit::Shutdown`] once `shutdown` is cancelled (after
/// awaiting any in-flight task), or [`LeaderExit::LeaseLost`] the moment
/// leadership is lost or a renewal fails.
pub async fn run_while_leader<F, Fut>(
    client: Client,
    config: LeaderElectionConfig,
    shutdown: CancellationToken,
    spawn: F,
) -> LeaderExit
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let leadership = LeaseLock::new(
        client,
        &config.namespace,
        LeaseLockParams {
            holder_id: config.holder_id.clone(),
            lease_name: config.lease_name.clone(),
            lease_ttl: config.lease_ttl,
        },
    );

    let mut task: Option<JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(config.renew_every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(t) = task.take() {
                    t.abort();
                    let _ = t.await;
                }
                return LeaderExit::Shutdown;
            }
            _ = tick.tick() => {}
        }

        let lease = match leadership.try_acquire_or_renew().await {
            Ok(lease) => lease,
            Err(e) => {
                error!(msg = "leader election renew/acquire failed", %e);
                if let Some(t) = task.take() {
                    t.abort();
                    warn!("aborted controller task; lost contact with the lease");
                }
                return LeaderExit::LeaseLost;
            }
        };

        if lease.acquired_lease {
            if task.is_none() {
                info!(holder_id = %config.holder_id, "acquired leadership; starting controllers");
                task = Some(tokio::spawn(spawn()));
            }
        } else if let Some(t) = task.take() {
            warn!("lost leadership; stopping controllers");
            t.abort();
            return LeaderExit::LeaseLost;
        }
    }
}
