use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::Utc;
use futures::channel::mpsc;
use futures::stream::{self, BoxStream, SelectAll};
use futures::{future, Stream, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIGroup;
use kube::core::object::HasStatus;
use kube::runtime::events::Recorder;
use kube::runtime::scheduler::{scheduler, ScheduleRequest};
use kube::runtime::{watcher, watcher::Config, Predicate, WatchStreamExt};
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    Resource,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::{self, Duration, Instant};
use tracing::*;

use crate::controllers::{Diagnostics, State};
use crate::resources::cdis::CDI;
use crate::resources::consolequickstarts::ConsoleQuickStart;
use crate::resources::hyperconvergeds::{HyperConverged, HYPERCONVERGED_NAME};
use crate::resources::kubevirts::KubeVirt;
use crate::resources::networkaddonsconfigs::NetworkAddonsConfig;
use crate::resources::ssps::SSP;
use crate::{telemetry, Error, Metrics};

use super::client::KubeClusterApi;
use super::events::RecorderEventEmitter;
use super::reconciler::HyperConvergedReconciler;
use super::reconcilers::quickstarts::load_quickstarts;
use super::reconcilers::APP_LABEL;
use super::request::ReconcileRequest;

/// Delay before a pass that asked to be requeued
const REQUEUE_DELAY: Duration = Duration::from_secs(2);
const CONFLICT_DELAY: Duration = Duration::from_secs(1);
const ERROR_DELAY: Duration = Duration::from_secs(30);
/// The singleton is reconciled at least this often, even without watch events
const RESYNC_PERIOD: Duration = Duration::from_secs(300);

type RequestStream = BoxStream<'static, Result<ReconcileRequest, watcher::Error>>;

// Context for our reconciler
struct Context {
    reconciler: HyperConvergedReconciler<KubeClusterApi>,
    /// Diagnostics read by the web server
    diagnostics: Arc<RwLock<Diagnostics>>,
}

#[instrument(skip(ctx), fields(trace_id))]
async fn reconcile(ctx: &Context, request: &ReconcileRequest) -> Option<Duration> {
    if let Some(trace_id) = telemetry::get_trace_id() {
        Span::current().record("trace_id", field::display(&trace_id));
    }
    let metrics = ctx.reconciler.metrics();
    let _timer = metrics.count_and_measure::<HyperConverged>();
    ctx.diagnostics.write().await.last_event = Utc::now();

    info!("Reconciling HyperConverged \"{request}\"");
    let deadline = ctx.reconciler.environment().reconcile_timeout;
    let result = match time::timeout(deadline, ctx.reconciler.reconcile(request)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Cancelled(deadline)),
    };

    match result {
        Ok(result) => {
            ctx.diagnostics.write().await.last_result = Some(format!(
                "reconciled {request}{}",
                if result.requeue { ", requeued" } else { "" }
            ));
            result.requeue.then_some(REQUEUE_DELAY)
        }
        Err(err) => {
            warn!("reconcile failed: {err:?}");
            metrics.reconcile_failure::<HyperConverged>(&request.name, &err);
            ctx.diagnostics.write().await.last_result = Some(format!("{request}: {err}"));
            Some(error_policy(&err))
        }
    }
}

fn error_policy(error: &Error) -> Duration {
    if error.is_conflict() {
        CONFLICT_DELAY
    } else {
        ERROR_DELAY
    }
}

fn group_installed<R: Resource<DynamicType = ()>>(groups: &[APIGroup]) -> bool {
    groups.iter().any(|group| {
        group.name == R::group(&()) && group.versions.iter().any(|v| v.version == R::version(&()))
    })
}

/// Watch a secondary kind and map every relevant change onto `placeholder`
fn secondary<K, P>(
    api: Api<K>,
    config: Config,
    predicate: P,
    placeholder: &ReconcileRequest,
) -> RequestStream
where
    K: Resource<DynamicType = ()>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned
        + Send
        + Sync
        + 'static,
    P: Predicate<K> + Send + 'static,
{
    let placeholder = placeholder.clone();
    watcher(api, config)
        .map(|event| ensure_deletion_change(event))
        .touched_objects()
        .default_backoff()
        .predicate_filter(predicate)
        .map_ok(move |_| placeholder.clone())
        .boxed()
}

// Initialize the controller and shared state (given the crd is installed)
pub async fn run(client: Client, state: State) {
    let env = state.environment().clone();
    let metrics = match Metrics::default().register(&state.registry) {
        Ok(metrics) => metrics,
        Err(e) => {
            error!("Could not register metrics: {e:?}");
            std::process::exit(1);
        }
    };

    let quick_starts = match env.quick_start_files_location.as_deref() {
        Some(dir) => match load_quickstarts(dir) {
            Ok(quick_starts) => quick_starts,
            Err(e) => {
                error!("{e}");
                std::process::exit(1);
            }
        },
        None => Vec::new(),
    };

    let api_groups = match client.list_api_groups().await {
        Ok(list) => list,
        Err(e) => {
            error!("Could not list api groups: {e:?}");
            std::process::exit(1);
        }
    };
    let quick_starts_installed = group_installed::<ConsoleQuickStart>(&api_groups.groups);

    let ns = env.operator_namespace.as_str();
    let hc_api = Api::<HyperConverged>::namespaced(client.clone(), ns);
    if let Err(e) = hc_api.list(&ListParams::default().limit(1)).await {
        error!("HyperConverged is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    let reconciler = HyperConvergedReconciler::new(
        KubeClusterApi::new(client.clone()),
        Arc::new(RecorderEventEmitter::new(Recorder::new(
            client.clone(),
            "hyperconverged-operator".into(),
        ))),
        metrics,
        env.clone(),
        quick_starts,
    );
    let placeholder = reconciler.secondary_placeholder().clone();

    // every object we create carries this label, the HC itself does not need it
    let cfg = Config::default().labels(&format!("{APP_LABEL}={HYPERCONVERGED_NAME}"));

    let mut streams: Vec<RequestStream> = vec![
        watcher(hc_api, Config::default())
            .map(|event| ensure_deletion_change(event))
            .touched_objects()
            .default_backoff()
            .predicate_filter(changed_predicate)
            .map_ok(|hc| ReconcileRequest::new(hc.name_any(), hc.namespace().unwrap_or_default()))
            .boxed(),
        secondary(
            Api::<KubeVirt>::namespaced(client.clone(), ns),
            cfg.clone(),
            changed_predicate.combine(status_predicate),
            &placeholder,
        ),
        secondary(
            Api::<CDI>::all(client.clone()),
            cfg.clone(),
            changed_predicate.combine(status_predicate),
            &placeholder,
        ),
        secondary(
            Api::<NetworkAddonsConfig>::all(client.clone()),
            cfg.clone(),
            changed_predicate.combine(status_predicate),
            &placeholder,
        ),
        secondary(
            Api::<SSP>::namespaced(client.clone(), ns),
            cfg.clone(),
            changed_predicate.combine(status_predicate),
            &placeholder,
        ),
        // cm has no generation so we hash the data to check for changes
        secondary(
            Api::<ConfigMap>::namespaced(client.clone(), ns),
            cfg.clone(),
            changed_predicate.combine(spec_predicate),
            &placeholder,
        ),
        // svc has no generation so we hash the spec to check for changes
        secondary(
            Api::<Service>::namespaced(client.clone(), ns),
            cfg.clone(),
            changed_predicate.combine(spec_predicate_serde),
            &placeholder,
        ),
    ];
    if quick_starts_installed {
        streams.push(secondary(
            Api::<ConsoleQuickStart>::all(client.clone()),
            cfg.clone(),
            changed_predicate,
            &placeholder,
        ));
    } else {
        info!("ConsoleQuickStart is not available on apiserver, not watching it");
    }

    let ctx = Context {
        reconciler,
        diagnostics: state.diagnostics.clone(),
    };
    dispatch(ctx, stream::select_all(streams)).await;
}

/// Merge watch events, periodic resyncs and requeues into one stream of due requests.
///
/// The scheduler keeps one entry per request, so duplicates that fall due together are
/// reconciled once, and an event for a request that is waiting on a requeue delay runs it early.
fn due_requests(
    watches: SelectAll<RequestStream>,
    singleton: ReconcileRequest,
    requeues: mpsc::UnboundedReceiver<ScheduleRequest<ReconcileRequest>>,
) -> impl Stream<Item = ReconcileRequest> {
    let watched = watches.filter_map(|event| async move {
        match event {
            Ok(request) => Some(ScheduleRequest {
                message: request,
                run_at: Instant::now(),
            }),
            Err(err) => {
                warn!("watch failed: {err}");
                None
            }
        }
    });
    let resync = stream::unfold(time::interval(RESYNC_PERIOD), move |mut interval| {
        let singleton = singleton.clone();
        async move {
            interval.tick().await;
            let request = ScheduleRequest {
                message: singleton,
                run_at: Instant::now(),
            };
            Some((request, interval))
        }
    });
    scheduler(stream::select(stream::select(watched, resync), requeues))
}

/// Resolves on SIGTERM or ctrl-c
async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("cannot listen for SIGTERM: {err}");
                future::pending::<()>().await
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = terminate => {},
    }
}

/// Run due requests through a single reconciler, one at a time
async fn dispatch(ctx: Context, watches: SelectAll<RequestStream>) {
    let (requeue_tx, requeue_rx) = mpsc::unbounded();
    let requests = due_requests(watches, ctx.reconciler.singleton(), requeue_rx);
    tokio::pin!(requests);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let request = tokio::select! {
            _ = &mut shutdown => {
                info!("shutting down");
                break;
            }
            next = requests.next() => match next {
                Some(request) => request,
                None => break,
            },
        };

        if let Some(delay) = reconcile(&ctx, &request).await {
            let requeue = ScheduleRequest {
                message: request,
                run_at: Instant::now() + delay,
            };
            if requeue_tx.unbounded_send(requeue).is_err() {
                break;
            }
        }
    }
}

// deletion apparently doesn't lead to any change in metadata otherwise, which means the changed_predicate
// would drop them.
fn ensure_deletion_change<K: Resource, E>(
    mut event: Result<watcher::Event<K>, E>,
) -> Result<watcher::Event<K>, E> {
    if let Ok(watcher::Event::Delete(ref mut object)) = event {
        let meta = object.meta_mut();
        meta.generation = match meta.generation {
            Some(val) => Some(val + 1),
            None => Some(0),
        }
    }
    event
}

fn changed_predicate<K: Resource>(obj: &K) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    if let Some(g) = obj.meta().generation {
        // covers spec but not metadata or status
        g.hash(&mut hasher)
    }
    obj.labels().hash(&mut hasher);
    obj.annotations().hash(&mut hasher);
    // ignore status
    Some(hasher.finish())
}

// operands publish their health through status only
fn status_predicate<K: Resource + HasStatus>(obj: &K) -> Option<u64>
where
    K::Status: Serialize,
{
    let mut hasher = DefaultHasher::new();
    if let Some(key) = obj.status().and_then(|s| serde_hashkey::to_key(s).ok()) {
        key.hash(&mut hasher);
    }
    Some(hasher.finish())
}

trait HasSpec {
    type Spec;

    fn spec(&self) -> &Self::Spec;
}

impl HasSpec for Service {
    type Spec = Option<ServiceSpec>;

    fn spec(&self) -> &Self::Spec {
        &self.spec
    }
}

impl HasSpec for ConfigMap {
    type Spec = Option<BTreeMap<String, String>>;

    fn spec(&self) -> &Self::Spec {
        &self.data
    }
}

fn spec_predicate<K: Resource + HasSpec>(obj: &K) -> Option<u64>
where
    K::Spec: Hash,
{
    let mut hasher = DefaultHasher::new();
    obj.spec().hash(&mut hasher);
    Some(hasher.finish())
}

fn spec_predicate_serde<K: Resource + HasSpec>(obj: &K) -> Option<u64>
where
    K::Spec: Serialize,
{
    let mut hasher = DefaultHasher::new();
    if let Ok(key) = serde_hashkey::to_key(obj.spec()) {
        key.hash(&mut hasher);
    }
    Some(hasher.finish())
}
