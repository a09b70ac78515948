//! Main reconciler for Experiment resources
//!
//! Implements the controller pattern using kube-rs runtime.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Event, Secret};
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        watcher::Config,
    },
    Resource, ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use crate::argocd::control_plane::FIELD_MANAGER;
use crate::argocd::layers::legacy_application_name;
use crate::argocd::{kubeconfig_server, ArgoClient, TailscaleOAuth};
use crate::crd::{
    ClusterRef, Experiment, ExperimentPhase, ExperimentSpec, ExperimentStatus, Target,
    TargetStatus,
};
use crate::error::{Error, Result};
use crate::results::{publish_summary, ExperimentSummary, ResultCommitter, ResultStore};

use super::conditions::{
    set_bool_condition, CONDITION_TYPE_EXPIRED, CONDITION_TYPE_LAYERS_HEALTHY,
    CONDITION_TYPE_READY, CONDITION_TYPE_WORKFLOW_COMPLETE,
};
use super::finalizers::EXPERIMENT_FINALIZER;
use super::lifecycle::{calculate_ttl, should_delete, time_remaining};
use super::workflow::{self, is_succeeded, is_terminal};

const CONVERGING_REQUEUE: Duration = Duration::from_secs(15);
const READY_REQUEUE: Duration = Duration::from_secs(60);
const FINISHED_REQUEUE: Duration = Duration::from_secs(300);

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub argo: ArgoClient,
    pub oauth: TailscaleOAuth,
    /// Namespace of workflows referenced without one
    pub workflow_namespace: String,
    pub committer: Option<Arc<dyn ResultCommitter>>,
    pub store: Option<Arc<dyn ResultStore>>,
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let experiments: Api<Experiment> = Api::all(state.client.clone());

    info!("Starting Experiment controller");

    // Verify CRD exists
    match experiments.list(&Default::default()).await {
        Ok(_) => info!("Experiment CRD is available"),
        Err(e) => {
            error!("Experiment CRD not found. Please install the CRD first: {:?}", e);
            return Err(Error::ConfigError("Experiment CRD not installed".to_string()));
        }
    }

    Controller::new(experiments, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

/// Name under which a target's cluster is registered with Argo CD
pub fn cluster_name(experiment: &str, target: &str) -> String {
    format!("{}-{}", experiment, target)
}

/// Helper to emit a Kubernetes Event
async fn emit_event(
    client: &Client,
    experiment: &Experiment,
    event_type: &str,
    reason: &str,
    message: &str,
) -> Result<()> {
    let namespace = experiment
        .namespace()
        .unwrap_or_else(|| "default".to_string());
    let events: Api<Event> = Api::namespaced(client.clone(), &namespace);

    let time = Utc::now();
    let event = Event {
        metadata: kube::api::ObjectMeta {
            generate_name: Some(format!("{}-event-", experiment.name_any())),
            ..Default::default()
        },
        type_: Some(event_type.to_string()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        involved_object: experiment.object_ref(&()),
        first_timestamp: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(time)),
        last_timestamp: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(time)),
        count: Some(1),
        ..Default::default()
    };

    events
        .create(&PostParams::default(), &event)
        .await
        .map_err(Error::KubeError)?;
    Ok(())
}

/// Emit an event, logging instead of failing the reconcile
async fn record_event(
    client: &Client,
    experiment: &Experiment,
    event_type: &str,
    reason: &str,
    message: &str,
) {
    if let Err(e) = emit_event(client, experiment, event_type, reason, message).await {
        warn!("Failed to emit {} event: {:?}", reason, e);
    }
}

/// The main reconciliation function
///
/// This function is called whenever:
/// - An Experiment is created, updated, or deleted
/// - The requeue timer expires
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<Experiment>, ctx: Arc<ControllerState>) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Experiment> = Api::namespaced(ctx.client.clone(), &namespace);

    info!(
        "Reconciling Experiment {}/{} ({} targets)",
        namespace,
        obj.name_any(),
        obj.spec.targets.len()
    );

    finalizer(&api, EXPERIMENT_FINALIZER, obj, |event| async {
        match event {
            FinalizerEvent::Apply(experiment) => apply_experiment(&ctx, &experiment).await,
            FinalizerEvent::Cleanup(experiment) => cleanup_experiment(&ctx, &experiment).await,
        }
    })
    .await
    .map_err(Error::from)
}

/// Per-target result of one reconcile pass
#[derive(Debug, Default)]
pub(crate) struct TargetOutcome {
    pub status: TargetStatus,
    pub layered: bool,
    pub layers_healthy: bool,
    /// The workload layer was created during this pass
    pub promoted: bool,
}

/// Deploy, promote and observe everything for an Experiment
#[instrument(skip(ctx, experiment), fields(name = %experiment.name_any(), namespace = experiment.namespace()))]
async fn apply_experiment(ctx: &ControllerState, experiment: &Experiment) -> Result<Action> {
    let name = experiment.name_any();
    let client = &ctx.client;
    let previous = experiment.status.clone().unwrap_or_default();
    let now = Utc::now();

    if let Err(e) = experiment.spec.validate() {
        warn!("Validation failed for {}: {}", name, e);
        let status = ExperimentStatus {
            phase: ExperimentPhase::Failed,
            message: Some(e.clone()),
            observed_generation: experiment.metadata.generation,
            ..previous
        };
        patch_status(client, experiment, &status).await?;
        return Err(Error::ValidationError(e));
    }

    let created_at = experiment.created_at().unwrap_or(now);
    let ttl_days = experiment.spec.ttl_days;
    let expires_at = calculate_ttl(created_at, ttl_days);

    if should_delete(created_at, ttl_days, now) {
        return expire_experiment(ctx, experiment, previous, expires_at).await;
    }

    let outcomes = try_join_all(
        experiment
            .spec
            .targets
            .iter()
            .map(|target| reconcile_target(ctx, experiment, target)),
    )
    .await?;

    for outcome in outcomes.iter().filter(|o| o.promoted) {
        record_event(
            client,
            experiment,
            "Normal",
            "WorkloadPromoted",
            &format!(
                "Infra and obs layers healthy, deployed workload for target {}",
                outcome.status.name
            ),
        )
        .await;
    }

    let workflow_phase = match &experiment.spec.workflow {
        Some(wf) => {
            let namespace = wf.namespace.as_deref().unwrap_or(&ctx.workflow_namespace);
            workflow::workflow_phase(client, &wf.name, namespace).await?
        }
        None => None,
    };

    let mut status = build_status(experiment, previous.clone(), &outcomes, workflow_phase, expires_at);

    if status.phase != previous.phase && is_finished(status.phase) {
        let event_type = if status.phase == ExperimentPhase::Succeeded {
            "Normal"
        } else {
            "Warning"
        };
        record_event(
            client,
            experiment,
            event_type,
            "Completed",
            &format!("Experiment {}", status.phase),
        )
        .await;
    }

    if should_publish(&experiment.spec, &status) {
        publish_results(ctx, experiment, &mut status, now).await;
    }

    patch_status(client, experiment, &status).await?;

    let remaining = time_remaining(created_at, ttl_days, Utc::now());
    Ok(Action::requeue(requeue_interval(status.phase, remaining)))
}

/// Read the kubeconfig for a target cluster from the Experiment's namespace
async fn read_kubeconfig(client: &Client, namespace: &str, cluster: &ClusterRef) -> Result<Vec<u8>> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = secrets.get(&cluster.secret_ref).await?;

    secret
        .data
        .and_then(|mut data| data.remove(&cluster.key))
        .map(|bytes| bytes.0)
        .ok_or_else(|| Error::KubeconfigError {
            cluster: cluster.secret_ref.clone(),
            message: format!("secret has no key {}", cluster.key),
        })
}

/// Deploy one target and report its readiness and components
#[instrument(skip(ctx, experiment, target), fields(target = %target.name))]
async fn reconcile_target(
    ctx: &ControllerState,
    experiment: &Experiment,
    target: &Target,
) -> Result<TargetOutcome> {
    let name = experiment.name_any();
    let namespace = experiment
        .namespace()
        .unwrap_or_else(|| "default".to_string());

    let kubeconfig = read_kubeconfig(&ctx.client, &namespace, &target.cluster).await?;
    let cluster = cluster_name(&name, &target.name);
    let server = match &target.cluster.server {
        Some(server) => server.clone(),
        None => kubeconfig_server(&cluster, &kubeconfig)?,
    };

    let deployment = ctx
        .argo
        .deploy_target(&name, target, &cluster, &kubeconfig, &server, &ctx.oauth)
        .await?;

    let mut outcome = TargetOutcome {
        status: TargetStatus {
            name: target.name.clone(),
            server: Some(server),
            layers: deployment.layers.iter().map(ToString::to_string).collect(),
            ..Default::default()
        },
        layered: deployment.layered,
        layers_healthy: deployment.layers_healthy,
        promoted: deployment.promoted,
    };

    let workload = legacy_application_name(&name, &target.name);
    let apps = ctx.argo.applications();
    outcome.status.ready = apps.is_healthy(&workload).await?;
    outcome.status.components = apps.application_components(&workload).await?;

    Ok(outcome)
}

/// Phase of an experiment from target readiness and the workflow phase
///
/// A terminal workflow decides the outcome even if workloads have since
/// degraded.
pub(crate) fn derive_phase(all_ready: bool, workflow_phase: Option<&str>) -> ExperimentPhase {
    match workflow_phase {
        Some(phase) if is_succeeded(phase) => ExperimentPhase::Succeeded,
        Some(phase) if is_terminal(phase) => ExperimentPhase::Failed,
        _ if !all_ready => ExperimentPhase::Deploying,
        Some(_) => ExperimentPhase::Running,
        None => ExperimentPhase::Ready,
    }
}

pub(crate) fn is_finished(phase: ExperimentPhase) -> bool {
    matches!(
        phase,
        ExperimentPhase::Succeeded | ExperimentPhase::Failed | ExperimentPhase::Expired
    )
}

/// Results are committed once, after the workflow succeeded
pub(crate) fn should_publish(spec: &ExperimentSpec, status: &ExperimentStatus) -> bool {
    spec.publish_results
        && status.phase == ExperimentPhase::Succeeded
        && !status.results_published
}

/// Requeue sooner while converging, never later than the expiry
pub(crate) fn requeue_interval(phase: ExperimentPhase, remaining: Duration) -> Duration {
    let interval = match phase {
        ExperimentPhase::Pending | ExperimentPhase::Deploying | ExperimentPhase::Running => {
            CONVERGING_REQUEUE
        }
        ExperimentPhase::Ready => READY_REQUEUE,
        ExperimentPhase::Succeeded | ExperimentPhase::Failed | ExperimentPhase::Expired => {
            FINISHED_REQUEUE
        }
    };
    interval.min(remaining).max(Duration::from_secs(1))
}

pub(crate) fn build_status(
    experiment: &Experiment,
    previous: ExperimentStatus,
    outcomes: &[TargetOutcome],
    workflow_phase: Option<String>,
    expires_at: DateTime<Utc>,
) -> ExperimentStatus {
    let generation = experiment.metadata.generation;
    let total = outcomes.len();
    let ready = outcomes.iter().filter(|o| o.status.ready).count();
    let all_ready = ready == total;
    let phase = derive_phase(all_ready, workflow_phase.as_deref());

    let message = match (&experiment.spec.workflow, &workflow_phase) {
        (Some(wf), Some(wf_phase)) if all_ready || is_terminal(wf_phase) => {
            format!("Workflow {} {}", wf.name, wf_phase)
        }
        _ => format!("{}/{} targets ready", ready, total),
    };

    let mut conditions = previous.conditions;
    set_bool_condition(
        &mut conditions,
        CONDITION_TYPE_READY,
        all_ready,
        if all_ready { "WorkloadsHealthy" } else { "Deploying" },
        &format!("{}/{} targets ready", ready, total),
        generation,
    );

    let layered: Vec<&TargetOutcome> = outcomes.iter().filter(|o| o.layered).collect();
    if !layered.is_empty() {
        let healthy = layered.iter().all(|o| o.layers_healthy);
        set_bool_condition(
            &mut conditions,
            CONDITION_TYPE_LAYERS_HEALTHY,
            healthy,
            if healthy { "LayersHealthy" } else { "LayersConverging" },
            "Infra and obs layers gate workload deployment",
            generation,
        );
    }

    if let Some(wf) = &experiment.spec.workflow {
        let done = workflow_phase.as_deref().is_some_and(is_terminal);
        set_bool_condition(
            &mut conditions,
            CONDITION_TYPE_WORKFLOW_COMPLETE,
            done,
            workflow_phase.as_deref().unwrap_or("NotStarted"),
            &format!("Workflow {}", wf.name),
            generation,
        );
    }

    ExperimentStatus {
        phase,
        message: Some(message),
        observed_generation: generation,
        conditions,
        targets: outcomes.iter().map(|o| o.status.clone()).collect(),
        workflow_phase,
        expires_at: Some(expires_at.to_rfc3339()),
        results_published: previous.results_published,
    }
}

/// Publish the result summary; failures are retried on the next pass
async fn publish_results(
    ctx: &ControllerState,
    experiment: &Experiment,
    status: &mut ExperimentStatus,
    now: DateTime<Utc>,
) {
    if ctx.committer.is_none() && ctx.store.is_none() {
        debug!("No result destination configured, not publishing results");
        return;
    }

    let name = experiment.name_any();
    let summary = ExperimentSummary::new(experiment, status, now);
    match publish_summary(ctx.committer.as_deref(), ctx.store.as_deref(), &summary).await {
        Ok(()) => {
            status.results_published = true;
            record_event(
                &ctx.client,
                experiment,
                "Normal",
                "ResultsPublished",
                "Published experiment results",
            )
            .await;
        }
        Err(e) => {
            warn!("Failed to publish results for {}: {:?}", name, e);
            record_event(
                &ctx.client,
                experiment,
                "Warning",
                "ResultsPublishFailed",
                &e.to_string(),
            )
            .await;
        }
    }
}

/// Mark an Experiment expired and delete it; teardown runs in the finalizer
async fn expire_experiment(
    ctx: &ControllerState,
    experiment: &Experiment,
    previous: ExperimentStatus,
    expires_at: DateTime<Utc>,
) -> Result<Action> {
    let name = experiment.name_any();
    let namespace = experiment
        .namespace()
        .unwrap_or_else(|| "default".to_string());

    info!("Experiment {}/{} expired at {}", namespace, name, expires_at);

    let mut status = ExperimentStatus {
        phase: ExperimentPhase::Expired,
        message: Some(format!("TTL elapsed at {}", expires_at.to_rfc3339())),
        observed_generation: experiment.metadata.generation,
        expires_at: Some(expires_at.to_rfc3339()),
        ..previous
    };
    set_bool_condition(
        &mut status.conditions,
        CONDITION_TYPE_EXPIRED,
        true,
        "TTLElapsed",
        "Experiment is being torn down",
        experiment.metadata.generation,
    );
    patch_status(&ctx.client, experiment, &status).await?;

    record_event(
        &ctx.client,
        experiment,
        "Normal",
        "Expired",
        &format!("TTL of {} day(s) elapsed, deleting", experiment.spec.ttl_days),
    )
    .await;

    let api: Api<Experiment> = Api::namespaced(ctx.client.clone(), &namespace);
    match api.delete(&name, &DeleteParams::default()).await {
        Ok(_) => info!("Deleted expired Experiment {}/{}", namespace, name),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            debug!("Expired Experiment {}/{} already deleted", namespace, name)
        }
        Err(e) => return Err(Error::KubeError(e)),
    }

    Ok(Action::await_change())
}

/// Clean up Argo CD state when an Experiment is deleted
#[instrument(skip(ctx, experiment), fields(name = %experiment.name_any(), namespace = experiment.namespace()))]
async fn cleanup_experiment(ctx: &ControllerState, experiment: &Experiment) -> Result<Action> {
    let name = experiment.name_any();
    info!("Cleaning up Experiment {}", name);

    let clusters: Vec<String> = experiment
        .spec
        .targets
        .iter()
        .map(|target| cluster_name(&name, &target.name))
        .collect();

    ctx.argo
        .delete_cluster_and_apps(&name, &experiment.spec.targets, &clusters)
        .await?;

    info!("Cleanup complete for Experiment {}", name);
    Ok(Action::await_change())
}

/// Write the status subresource
async fn patch_status(client: &Client, experiment: &Experiment, status: &ExperimentStatus) -> Result<()> {
    let namespace = experiment
        .namespace()
        .unwrap_or_else(|| "default".to_string());
    let api: Api<Experiment> = Api::namespaced(client.clone(), &namespace);

    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        &experiment.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await
    .map_err(Error::KubeError)?;

    Ok(())
}

/// Error policy determines how to handle reconciliation errors
fn error_policy(experiment: Arc<Experiment>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!(
        "Reconciliation error for {}: {:?}",
        experiment.name_any(),
        error
    );

    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
