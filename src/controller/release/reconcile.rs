use crate::backoff::Backoff;
use crate::clusterstore::{ClusterStore, ClusterStoreError};
use crate::controller::aggregate;
use crate::controller::clock::{Clock, SystemClock};
use crate::crd::release::ReleaseStatus;
use crate::crd::{
    Application, CapacityTarget, InstallationTarget, Release, TrafficTarget, APP_LABEL,
};
use crate::server::SharedMetrics;
use crate::store::{KubeStore, ObjectStore, StoreError};
use dashmap::DashMap;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::role::{resolve, Role, RoleError};
use super::status::{blocked_status, contender_status, settled_status, status_patch};
use super::strategy::{desired_targets, evaluate, DesiredTargets, Observations, Side};
use super::targets::upsert_target;
use super::validation::{validate_target_step, StrategyError};

/// Identity the coordinator uses towards the cluster store
pub const AGENT: &str = "release-controller";

/// Retry delays of failed passes, per Release
pub const RETRY_BACKOFF: Backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(300));

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("object store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cluster(#[from] ClusterStoreError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    Role(#[from] RoleError),

    #[error("Release missing namespace")]
    MissingNamespace,

    #[error("Release {0} has no shipper-app label")]
    MissingAppLabel(String),

    #[error("application {namespace}/{name} not found")]
    ApplicationNotFound { namespace: String, name: String },

    #[error("Release {0} is not scheduled on any cluster")]
    NotScheduled(String),
}

impl ReconcileError {
    /// Errors that retrying cannot fix until an operator changes something
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReconcileError::Strategy(_))
    }
}

pub struct Context {
    pub applications: Arc<dyn ObjectStore<Application>>,
    pub releases: Arc<dyn ObjectStore<Release>>,
    pub capacity_targets: Arc<dyn ObjectStore<CapacityTarget>>,
    pub traffic_targets: Arc<dyn ObjectStore<TrafficTarget>>,
    pub installation_targets: Arc<dyn ObjectStore<InstallationTarget>>,
    pub clusters: Arc<ClusterStore>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Option<SharedMetrics>,
    /// Requeue interval of a successful pass
    pub resync_interval: Duration,
    /// Consecutive failures per `namespace/name`, reset on success
    pub retries: DashMap<String, u32>,
}

impl Context {
    /// Context backed by the management cluster's API server
    pub fn new(
        client: kube::Client,
        clusters: Arc<ClusterStore>,
        metrics: Option<SharedMetrics>,
        resync_interval: Duration,
    ) -> Self {
        Context {
            applications: Arc::new(KubeStore::new(client.clone())),
            releases: Arc::new(KubeStore::new(client.clone())),
            capacity_targets: Arc::new(KubeStore::new(client.clone())),
            traffic_targets: Arc::new(KubeStore::new(client.clone())),
            installation_targets: Arc::new(KubeStore::new(client)),
            clusters,
            clock: Arc::new(SystemClock),
            metrics,
            resync_interval,
            retries: DashMap::new(),
        }
    }
}

fn retry_key(release: &Release) -> String {
    format!(
        "{}/{}",
        release.namespace().unwrap_or_default(),
        release.name_any()
    )
}

/// Reconcile a Release
///
/// One pass of the strategy coordinator:
/// 1. Re-reads the Release and its Application
/// 2. Derives the release role from the Application history
/// 3. Checks every scheduled cluster is ready in the cluster store
/// 4. Upserts the target objects for the current step
/// 5. Aggregates target status into the next strategy state
/// 6. Writes status if it changed
///
/// # Returns
/// * `Ok(Action)` - requeue after the resync interval, or wait for a change
///   when the release is blocked on a misconfiguration
/// * `Err(ReconcileError)` - the pass failed and is retried with backoff
pub async fn reconcile(release: Arc<Release>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let start_time = Instant::now();
    let result = reconcile_release(&release, &ctx).await;
    let duration_secs = start_time.elapsed().as_secs_f64();

    if let Some(ref metrics) = ctx.metrics {
        match &result {
            Ok(_) => metrics.record_reconciliation_success(duration_secs),
            Err(_) => metrics.record_reconciliation_error(duration_secs),
        }
    }
    if result.is_ok() {
        ctx.retries.remove(&retry_key(&release));
    }
    result
}

/// Error policy for the controller
///
/// Terminal errors wait for the object to change; everything else is
/// requeued with per-release exponential backoff.
pub fn error_policy(release: Arc<Release>, error: &ReconcileError, ctx: Arc<Context>) -> Action {
    if error.is_terminal() {
        error!(release = ?release.name_any(), error = %error, "Reconcile failed, waiting for a change");
        return Action::await_change();
    }

    let attempt = {
        let mut entry = ctx.retries.entry(retry_key(&release)).or_insert(0);
        let attempt = *entry;
        *entry = entry.saturating_add(1);
        attempt
    };
    let delay = RETRY_BACKOFF.delay(attempt);
    warn!(
        release = ?release.name_any(),
        error = %error,
        attempt = attempt + 1,
        retry_in = ?delay,
        "Reconcile error (will retry)"
    );
    Action::requeue(delay)
}

async fn reconcile_release(release: &Release, ctx: &Context) -> Result<Action, ReconcileError> {
    let namespace = release.namespace().ok_or(ReconcileError::MissingNamespace)?;
    let name = release.name_any();

    // The watch event may be stale; TargetStep can move between passes
    let Some(release) = ctx.releases.get(&namespace, &name).await? else {
        debug!(release = ?name, "Release is gone");
        return Ok(Action::await_change());
    };

    let app_name = release
        .labels()
        .get(APP_LABEL)
        .cloned()
        .ok_or_else(|| ReconcileError::MissingAppLabel(name.clone()))?;
    let application = ctx
        .applications
        .get(&namespace, &app_name)
        .await?
        .ok_or_else(|| ReconcileError::ApplicationNotFound {
            namespace: namespace.clone(),
            name: app_name.clone(),
        })?;
    let siblings = ctx
        .releases
        .list(&namespace, Some(&format!("{APP_LABEL}={app_name}")))
        .await?;

    let role = resolve(&release, &app_name, application.history(), &siblings)?;
    debug!(release = ?name, role = role.name(), "Resolved release role");

    let new_status = match role {
        Role::Contender { incumbent } => {
            let step = match validate_target_step(
                &release.spec.environment.strategy,
                release.spec.target_step,
            ) {
                Ok(step) => step,
                Err(e) => return block(&release, &namespace, e, ctx).await,
            };
            drive_contender(&release, incumbent.as_ref(), step, ctx).await?
        }
        Role::Incumbent { contender } => {
            settle(&release, &contender, Side::Incumbent, ctx).await?
        }
        Role::Retired { contender } => settle(&release, &contender, Side::Retired, ctx).await?,
    };

    write_status(&release, &namespace, new_status, ctx).await?;
    Ok(Action::requeue(ctx.resync_interval))
}

/// Every scheduled cluster of `release` must be ready
fn gate_clusters(release: &Release, ctx: &Context) -> Result<Vec<String>, ReconcileError> {
    let clusters = release.scheduled_clusters();
    if clusters.is_empty() {
        return Err(ReconcileError::NotScheduled(release.name_any()));
    }
    for cluster in &clusters {
        ctx.clusters.get_client(cluster, AGENT)?;
    }
    Ok(clusters)
}

/// Stored targets of one release after upserting `desired`
struct Targets {
    desired: DesiredTargets,
    installation: InstallationTarget,
    capacity: CapacityTarget,
    traffic: TrafficTarget,
}

async fn write_targets(
    release: &Release,
    desired: DesiredTargets,
    ctx: &Context,
) -> Result<Targets, ReconcileError> {
    let installation = upsert_target(
        ctx.installation_targets.as_ref(),
        release,
        desired.installation.clone(),
        InstallationTarget::new,
    )
    .await?;
    let capacity = upsert_target(
        ctx.capacity_targets.as_ref(),
        release,
        desired.capacity.clone(),
        CapacityTarget::new,
    )
    .await?;
    let traffic = upsert_target(
        ctx.traffic_targets.as_ref(),
        release,
        desired.traffic.clone(),
        TrafficTarget::new,
    )
    .await?;

    Ok(Targets {
        desired,
        installation,
        capacity,
        traffic,
    })
}

async fn drive_contender(
    release: &Release,
    incumbent: Option<&Release>,
    step: usize,
    ctx: &Context,
) -> Result<ReleaseStatus, ReconcileError> {
    let name = release.name_any();
    let clusters = gate_clusters(release, ctx)?;
    let incumbent_clusters = incumbent
        .map(|incumbent| gate_clusters(incumbent, ctx))
        .transpose()?;

    let step_spec = &release.spec.environment.strategy.steps[step];
    let own = write_targets(
        release,
        desired_targets(
            &clusters,
            step_spec,
            Side::Contender,
            release.spec.environment.replica_count(),
        ),
        ctx,
    )
    .await?;

    let incumbent_targets = match (incumbent, incumbent_clusters) {
        (Some(incumbent), Some(clusters)) => Some(
            write_targets(
                incumbent,
                desired_targets(
                    &clusters,
                    step_spec,
                    Side::Incumbent,
                    incumbent.spec.environment.replica_count(),
                ),
                ctx,
            )
            .await?,
        ),
        _ => None,
    };

    let observations = Observations {
        contender_installation: aggregate::installation(
            &own.desired.installation.clusters,
            own.installation.status.as_ref(),
        ),
        contender_capacity: aggregate::capacity(&own.desired.capacity, own.capacity.status.as_ref()),
        contender_traffic: aggregate::traffic(&own.desired.traffic, own.traffic.status.as_ref()),
        incumbent_capacity: incumbent_targets
            .as_ref()
            .map(|t| aggregate::capacity(&t.desired.capacity, t.capacity.status.as_ref())),
        incumbent_traffic: incumbent_targets
            .as_ref()
            .map(|t| aggregate::traffic(&t.desired.traffic, t.traffic.status.as_ref())),
    };
    let transition = evaluate(&observations);
    let step_index = step as i32;

    match &transition.reason {
        Some(reason) => debug!(release = ?name, step = step_index, state = %transition.state, reason = %reason, "Step not achieved yet"),
        None if release.achieved_step() != Some(step_index) => {
            info!(release = ?name, step = step_index, step_name = %step_spec.name, "Step achieved, waiting for command")
        }
        None => {}
    }

    Ok(contender_status(
        release,
        step,
        &observations,
        &transition,
        ctx.clock.now(),
    ))
}

/// Incumbent and retired releases follow the contender's target step
async fn settle(
    release: &Release,
    contender: &Release,
    side: Side,
    ctx: &Context,
) -> Result<ReleaseStatus, ReconcileError> {
    let strategy = &contender.spec.environment.strategy;
    let step = validate_target_step(strategy, contender.spec.target_step)?;
    let clusters = gate_clusters(release, ctx)?;

    write_targets(
        release,
        desired_targets(
            &clusters,
            &strategy.steps[step],
            side,
            release.spec.environment.replica_count(),
        ),
        ctx,
    )
    .await?;

    Ok(settled_status(release, ctx.clock.now()))
}

/// Record a misconfiguration on the Release and stop retrying
async fn block(
    release: &Release,
    namespace: &str,
    err: StrategyError,
    ctx: &Context,
) -> Result<Action, ReconcileError> {
    error!(release = ?release.name_any(), error = %err, "Release blocked");
    let status = blocked_status(release, err.reason(), err.to_string(), ctx.clock.now());
    write_status(release, namespace, status, ctx).await?;
    Ok(Action::await_change())
}

async fn write_status(
    release: &Release,
    namespace: &str,
    status: ReleaseStatus,
    ctx: &Context,
) -> Result<(), ReconcileError> {
    let name = release.name_any();
    if let Some(ref metrics) = ctx.metrics {
        metrics.set_achieved_step(
            namespace,
            &name,
            status.achieved_step.as_ref().map(|a| a.step),
        );
    }

    if release.status.as_ref() == Some(&status) {
        debug!(release = ?name, "Status unchanged");
        return Ok(());
    }

    let patch = status_patch(&status).map_err(StoreError::from)?;
    ctx.releases.patch_status(namespace, &name, &patch).await?;
    info!(
        release = ?name,
        achieved_step = ?status.achieved_step.as_ref().map(|a| a.step),
        "Release status updated"
    );
    Ok(())
}
