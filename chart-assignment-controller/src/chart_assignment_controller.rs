use crate::{
    CLOUD_CLUSTER, Configuration, FINALIZER, REQUEUE_FAST, REQUEUE_SLOW,
    assignment_modifications::AssignmentModifications,
    cluster_api::{ClusterApi, KubeClusterApi},
    deletion::ensure_deleted,
    errors::{ControllerError, ErrorKind},
    event_router::assignments_for_pod,
    provisioner::{ensure_namespace, ensure_service_account},
    release::ReleaseEngine,
    status::set_status,
    utils::{add_finalizer, metric_name},
};

use chart_assignment_apis::{ChartAssignment, ChartAssignmentPhase};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client, ResourceExt};
use kube_runtime::{
    controller::{self, Action, Controller},
    watcher::Config,
};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram, Meter},
};
use std::{future::Future, sync::Arc, time::Instant};
use tokio::time::{Duration, sleep};

const CHART_ASSIGNMENT_CONTROLLER: &'static str = "chart_assignment_controller";

/// Requeue delay after reconcile errors which are not handled in [`ChartAssignmentController::reconcile`].
const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Drives ChartAssignments of the local cluster towards their desired state:
/// target namespace, pull credentials, finalizer, release and status.
pub(crate) struct ChartAssignmentController {
    configuration: Configuration,
    store: Arc<dyn ClusterApi>,
    releases: Arc<dyn ReleaseEngine>,
    reconcile_count: Counter<u64>,
    reconcile_duration: Histogram<u64>,
    reconcile_errors: Counter<u64>,
}

impl ChartAssignmentController {
    pub fn new(
        configuration: Configuration,
        store: Arc<dyn ClusterApi>,
        releases: Arc<dyn ReleaseEngine>,
    ) -> Self {
        let meter: Meter = global::meter(CHART_ASSIGNMENT_CONTROLLER);
        let reconcile_count = meter
            .u64_counter(metric_name("reconcile_count"))
            .with_description("Count of ChartAssignment reconcile invocations")
            .build();
        let reconcile_duration = meter
            .u64_histogram(metric_name("reconcile_duration_ms"))
            .with_description("Reconcile duration of ChartAssignment objects in milliseconds")
            .with_unit("ms")
            .build();
        let reconcile_errors = meter
            .u64_counter(metric_name("reconcile_errors"))
            .with_description("Count of reconcile invocation errors for ChartAssignment resources")
            .build();
        Self {
            configuration,
            store,
            releases,
            reconcile_count,
            reconcile_duration,
            reconcile_errors,
        }
    }

    /// Reconciles the ChartAssignment with the given name and decides when to
    /// look at it again. Only errors which need the controller's back-off are
    /// returned, all others translate into a requeue.
    pub(crate) async fn reconcile(&self, name: &str) -> Result<Action, ControllerError> {
        match self.reconcile_assignment(name).await {
            Ok(action) => Ok(action),
            Err(e) => match e.kind() {
                ErrorKind::Transient => {
                    info!("ChartAssignment {} not ready yet: {}", name, e);
                    Ok(Action::requeue(REQUEUE_FAST))
                }
                ErrorKind::NotFound => {
                    debug!("ChartAssignment {} vanished during reconcile: {}", name, e);
                    Ok(Action::await_change())
                }
                ErrorKind::Conflict => {
                    debug!("ChartAssignment {} was modified concurrently: {}", name, e);
                    Ok(Action::requeue(REQUEUE_FAST))
                }
                ErrorKind::Fatal => Err(e),
            },
        }
    }

    async fn reconcile_assignment(&self, name: &str) -> Result<Action, ControllerError> {
        let store = self.store.as_ref();
        let releases = self.releases.as_ref();
        // Always work on the latest version of the object.
        let assignment = match store.get_assignment(name).await? {
            Some(assignment) => assignment,
            None => {
                debug!("ChartAssignment {} not found", name);
                return Ok(Action::await_change());
            }
        };
        if assignment.spec.cluster_name != self.configuration.cluster {
            debug!(
                "Ignore ChartAssignment {} assigned to cluster {}",
                name, assignment.spec.cluster_name
            );
            return Ok(Action::await_change());
        }
        let mut event = AssignmentModifications::new(assignment);

        if event.is_deleted() {
            ensure_deleted(store, releases, &mut event).await?;
            set_status(store, releases, &mut event).await?;
            return Ok(Action::requeue(REQUEUE_FAST));
        }

        let ns = ensure_namespace(store, &event).await?;
        if self.configuration.cluster != CLOUD_CLUSTER {
            ensure_service_account(store, &self.configuration.pull_secret, &ns, &event).await?;
        }
        if add_finalizer(event.finalizers_mut(), FINALIZER) {
            event.patch_spec(store).await?;
            debug!("added finalizer to ChartAssignment {}", name);
        }
        releases.ensure_updated(name, &event.spec.chart);
        set_status(store, releases, &mut event).await?;

        match event.phase() {
            Some(ChartAssignmentPhase::Ready) | Some(ChartAssignmentPhase::Failed) => {
                Ok(Action::requeue(REQUEUE_SLOW))
            }
            _ => Ok(Action::requeue(REQUEUE_FAST)),
        }
    }

    /// Controller triggers this whenever a ChartAssignment or a pod in its
    /// target namespace changed.
    async fn reconcile_object(
        object: Arc<ChartAssignment>,
        ctx: Arc<Self>,
    ) -> Result<Action, ControllerError> {
        let me = ctx.as_ref();
        let name = object.name_any();
        let start = Instant::now();
        let result = me.reconcile(name.as_str()).await;
        let duration = Instant::now() - start;
        let labels = &[KeyValue::new("object_name", name)];
        me.reconcile_count.add(1, labels);
        me.reconcile_duration
            .record(duration.as_millis() as u64, labels);
        result
    }

    /// The controller triggers this on reconcile errors
    fn error_policy(object: Arc<ChartAssignment>, error: &ControllerError, ctx: Arc<Self>) -> Action {
        let name = object.name_any();
        warn!("reconcile of ChartAssignment {} failed: {}", name, error);
        ctx.reconcile_errors
            .add(1, &[KeyValue::new("object_name", name)]);
        Action::requeue(ERROR_REQUEUE)
    }

    pub fn start(self, client: Client) -> impl Future<Output = ()> {
        let config = controller::Config::default().concurrency(self.configuration.concurrency);
        let controller = Controller::new(
            Api::<ChartAssignment>::all(client.clone()),
            Config::default(),
        )
        .with_config(config);
        let assignments = controller.store();
        let reconcile_errors = self.reconcile_errors.clone();
        controller
            .watches(Api::<Pod>::all(client), Config::default(), move |pod| {
                assignments_for_pod(&assignments, &pod)
            })
            .shutdown_on_signal()
            .run(Self::reconcile_object, Self::error_policy, Arc::new(self))
            .for_each(move |res| {
                let reconcile_errors = reconcile_errors.clone();
                async move {
                    match res {
                        Ok((o, _)) => debug!("reconciled ChartAssignment {}", o.name),
                        // Logged and counted by error_policy.
                        Err(controller::Error::ReconcilerFailed(_, o)) => {
                            debug!("reconcile of ChartAssignment {} failed", o.name)
                        }
                        Err(controller::Error::ObjectNotFound(o)) => {
                            debug!("ChartAssignment {} not in cache", o.name)
                        }
                        Err(e @ controller::Error::QueueError(_)) => {
                            warn!("ChartAssignment watch failed: {:?}", e);
                            reconcile_errors.add(1, &[]);
                            // Slow down on errors caused by missing CRDs or permissions.
                            sleep(ERROR_REQUEUE).await;
                        }
                        Err(e) => {
                            warn!("ChartAssignment controller failed: {:?}", e);
                            reconcile_errors.add(1, &[]);
                        }
                    }
                }
            })
    }
}

/// Wires the controller to the Kubernetes API server.
pub(crate) fn kube_controller(
    configuration: Configuration,
    client: Client,
    releases: Arc<dyn ReleaseEngine>,
) -> ChartAssignmentController {
    let store = Arc::new(KubeClusterApi::new(client));
    ChartAssignmentController::new(configuration, store, releases)
}
