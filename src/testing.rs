//! In-memory stand-ins for the API server and the event recorder, plus fixtures.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{ConfigMap, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::error::ErrorResponse;
use kube::runtime::events::EventType;
use serde_json::Value;

use crate::controllers::hyperconverged::client::{ApiObject, ClusterApi};
use crate::controllers::hyperconverged::events::EventEmitter;
use crate::controllers::OperatorEnvironment;
use crate::resources::hyperconvergeds::{
    HyperConverged, HyperConvergedConfig, HyperConvergedSpec, NodePlacement, HYPERCONVERGED_NAME,
};
use crate::resources::OperandCondition;

pub fn api_error(code: u16, reason: &str, message: impl Into<String>) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: message.into(),
        reason: reason.into(),
        code,
    })
}

/// (apiVersion/kind, namespace, name)
type ObjectKey = (String, Option<String>, String);

struct InjectedFailure {
    verb: String,
    kind: String,
    name: String,
    code: u16,
}

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<ObjectKey, Value>,
    resource_version: u64,
    failures: Vec<InjectedFailure>,
}

impl FakeState {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn check_failure<K: ApiObject>(&self, verb: &str, name: &str) -> Result<(), kube::Error> {
        let kind = K::kind(&());
        match self.failures.iter().find(|f| {
            f.verb == verb && f.kind == kind && (f.name.is_empty() || f.name == name)
        }) {
            Some(failure) => Err(api_error(
                failure.code,
                "Injected",
                format!("fake {verb} error on {kind} {name}"),
            )),
            None => Ok(()),
        }
    }
}

/// API server double keeping objects as JSON.
///
/// Writes are guarded by resourceVersion, `update` never touches the status and
/// `update_status` touches nothing else. Deleting an object with finalizers only marks it.
#[derive(Clone, Default)]
pub struct FakeClusterApi {
    state: Arc<Mutex<FakeState>>,
}

fn type_key<K: ApiObject>() -> String {
    format!("{}/{}", K::api_version(&()), K::kind(&()))
}

fn key_of<K: ApiObject>(obj: &K) -> ObjectKey {
    (type_key::<K>(), obj.meta().namespace.clone(), obj.meta().name.clone().unwrap_or_default())
}

fn metadata_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get("metadata")?.get(field)?.as_str()
}

fn has_finalizers(value: &Value) -> bool {
    value["metadata"]["finalizers"]
        .as_array()
        .is_some_and(|f| !f.is_empty())
}

fn matches_selector(value: &Value, selector: &str) -> bool {
    let labels = &value["metadata"]["labels"];
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, expected)) => labels[key].as_str() == Some(expected),
            None => !labels[term].is_null(),
        })
}

fn decode<K: ApiObject>(value: &Value) -> K {
    serde_json::from_value(value.clone()).expect("stored object decodes")
}

impl FakeClusterApi {
    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Store `obj` as if created by someone else, bypassing injected failures
    pub fn insert<K: ApiObject>(&self, obj: &K) {
        let mut state = self.lock();
        let mut value = serde_json::to_value(obj).unwrap();
        let rv = state.next_resource_version();
        value["metadata"]["resourceVersion"] = rv.clone().into();
        if metadata_str(&value, "uid").is_none() {
            value["metadata"]["uid"] = format!("uid-{rv}").into();
        }
        if value["metadata"]["generation"].is_null() {
            value["metadata"]["generation"] = 1.into();
        }
        state.objects.insert(key_of(obj), value);
    }

    /// Read without going through the failure injection
    pub fn object<K: ApiObject>(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        let key = (type_key::<K>(), namespace.map(String::from), name.to_string());
        self.lock().objects.get(&key).map(decode)
    }

    /// Apply `f` to a stored object as an out-of-band writer would
    pub fn modify<K: ApiObject>(&self, namespace: Option<&str>, name: &str, f: impl FnOnce(&mut K)) {
        let mut obj: K = self
            .object(namespace, name)
            .unwrap_or_else(|| panic!("{} {name} not found", K::kind(&())));
        f(&mut obj);
        self.insert(&obj);
    }

    /// Make `verb` (get, list, create, update, update_status, delete) fail with a 500.
    /// An empty `name` matches every object of `kind`.
    pub fn fail_on(&self, verb: &str, kind: &str, name: &str) {
        self.fail_with(verb, kind, name, 500);
    }

    pub fn fail_with(&self, verb: &str, kind: &str, name: &str, code: u16) {
        self.lock().failures.push(InjectedFailure {
            verb: verb.into(),
            kind: kind.into(),
            name: name.into(),
            code,
        });
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn count<K: ApiObject>(&self) -> usize {
        let type_key = type_key::<K>();
        self.lock()
            .objects
            .keys()
            .filter(|(t, _, _)| *t == type_key)
            .count()
    }
}

#[async_trait]
impl ClusterApi for FakeClusterApi {
    async fn get<K: ApiObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>, kube::Error> {
        self.lock().check_failure::<K>("get", name)?;
        Ok(self.object(namespace, name))
    }

    async fn list<K: ApiObject>(
        &self,
        namespace: Option<&str>,
        labels: &str,
    ) -> Result<Vec<K>, kube::Error> {
        let state = self.lock();
        state.check_failure::<K>("list", "")?;
        let type_key = type_key::<K>();
        Ok(state
            .objects
            .iter()
            .filter(|((t, ns, _), value)| {
                *t == type_key
                    && (namespace.is_none() || ns.as_deref() == namespace)
                    && matches_selector(value, labels)
            })
            .map(|(_, value)| decode(value))
            .collect())
    }

    async fn create<K: ApiObject>(&self, obj: &K) -> Result<K, kube::Error> {
        let key = key_of(obj);
        let mut state = self.lock();
        state.check_failure::<K>("create", &key.2)?;
        if state.objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", format!("{} already exists", key.2)));
        }
        let mut value = serde_json::to_value(obj).map_err(kube::Error::SerdeError)?;
        let rv = state.next_resource_version();
        value["metadata"]["resourceVersion"] = rv.clone().into();
        value["metadata"]["uid"] = format!("uid-{rv}").into();
        value["metadata"]["generation"] = 1.into();
        let created = decode(&value);
        state.objects.insert(key, value);
        Ok(created)
    }

    async fn update<K: ApiObject>(&self, obj: &K) -> Result<K, kube::Error> {
        let key = key_of(obj);
        let mut state = self.lock();
        state.check_failure::<K>("update", &key.2)?;
        let Some(stored) = state.objects.get(&key).cloned() else {
            return Err(api_error(404, "NotFound", format!("{} not found", key.2)));
        };
        let mut value = serde_json::to_value(obj).map_err(kube::Error::SerdeError)?;
        if let Some(rv) = metadata_str(&value, "resourceVersion") {
            if Some(rv) != metadata_str(&stored, "resourceVersion") {
                return Err(api_error(409, "Conflict", "the object has been modified"));
            }
        }

        match stored.get("status") {
            Some(status) => value["status"] = status.clone(),
            None => {
                if let Some(map) = value.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        for field in ["uid", "deletionTimestamp"] {
            value["metadata"][field] = stored["metadata"][field].clone();
        }
        let mut generation = stored["metadata"]["generation"].as_i64().unwrap_or(1);
        if value.get("spec") != stored.get("spec") {
            generation += 1;
        }
        value["metadata"]["generation"] = generation.into();
        value["metadata"]["resourceVersion"] = state.next_resource_version().into();

        let updated = decode(&value);
        if !value["metadata"]["deletionTimestamp"].is_null() && !has_finalizers(&value) {
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, value);
        }
        Ok(updated)
    }

    async fn update_status<K: ApiObject>(&self, obj: &K) -> Result<K, kube::Error> {
        let key = key_of(obj);
        let mut state = self.lock();
        state.check_failure::<K>("update_status", &key.2)?;
        let Some(mut stored) = state.objects.get(&key).cloned() else {
            return Err(api_error(404, "NotFound", format!("{} not found", key.2)));
        };
        let value = serde_json::to_value(obj).map_err(kube::Error::SerdeError)?;
        if let Some(rv) = metadata_str(&value, "resourceVersion") {
            if Some(rv) != metadata_str(&stored, "resourceVersion") {
                return Err(api_error(409, "Conflict", "the object has been modified"));
            }
        }
        stored["status"] = value.get("status").cloned().unwrap_or(Value::Null);
        stored["metadata"]["resourceVersion"] = state.next_resource_version().into();
        let updated = decode(&stored);
        state.objects.insert(key, stored);
        Ok(updated)
    }

    async fn delete<K: ApiObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, kube::Error> {
        let key = (type_key::<K>(), namespace.map(String::from), name.to_string());
        let mut state = self.lock();
        state.check_failure::<K>("delete", name)?;
        let Some(stored) = state.objects.get(&key).cloned() else {
            return Ok(false);
        };
        if has_finalizers(&stored) {
            let mut stored = stored;
            if stored["metadata"]["deletionTimestamp"].is_null() {
                stored["metadata"]["deletionTimestamp"] =
                    serde_json::to_value(Time(Utc::now())).map_err(kube::Error::SerdeError)?;
                stored["metadata"]["resourceVersion"] = state.next_resource_version().into();
            }
            state.objects.insert(key, stored);
        } else {
            state.objects.remove(&key);
        }
        Ok(true)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub type_: &'static str,
    pub reason: String,
    pub message: String,
}

#[derive(Default)]
pub struct RecordingEventEmitter {
    events: Mutex<Vec<RecordedEvent>>,
}

fn type_name(type_: EventType) -> &'static str {
    match type_ {
        EventType::Normal => "Normal",
        EventType::Warning => "Warning",
    }
}

impl RecordingEventEmitter {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn contains(&self, type_: EventType, reason: &str, message: &str) -> bool {
        self.events()
            .iter()
            .any(|e| e.type_ == type_name(type_) && e.reason == reason && e.message == message)
    }

    pub fn has_reason(&self, type_: EventType, reason: &str) -> bool {
        self.events()
            .iter()
            .any(|e| e.type_ == type_name(type_) && e.reason == reason)
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventEmitter for RecordingEventEmitter {
    async fn emit(&self, _hc: &HyperConverged, type_: EventType, reason: &str, message: &str) {
        self.events.lock().unwrap().push(RecordedEvent {
            type_: type_name(type_),
            reason: reason.into(),
            message: message.into(),
        });
    }
}

/// The singleton as a user would create it
pub fn hco() -> HyperConverged {
    let mut hc = HyperConverged::new(HYPERCONVERGED_NAME, HyperConvergedSpec::default());
    hc.metadata.namespace = Some(OperatorEnvironment::default().operator_namespace);
    hc.metadata.uid = Some("hco-uid".into());
    hc
}

fn placement(key: &str, value: &str) -> HyperConvergedConfig {
    HyperConvergedConfig {
        node_placement: Some(NodePlacement {
            node_selector: Some(BTreeMap::from([(key.to_string(), value.to_string())])),
            affinity: None,
            tolerations: Some(vec![Toleration {
                key: Some(key.into()),
                operator: Some("Equal".into()),
                value: Some(value.into()),
                effect: Some("NoSchedule".into()),
                ..Default::default()
            }]),
        }),
    }
}

/// Infra pinned to `key1=value1`, workloads to `key2=value2`
pub fn hco_with_placement() -> HyperConverged {
    let mut hc = hco();
    hc.spec.infra = placement("key1", "value1");
    hc.spec.workloads = placement("key2", "value2");
    hc
}

pub fn legacy_config_map(migrations: Option<&str>) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some("kubevirt-config".into()),
            namespace: Some(OperatorEnvironment::default().operator_namespace),
            ..Default::default()
        },
        data: migrations.map(|m| BTreeMap::from([("migrations".to_string(), m.to_string())])),
        ..Default::default()
    }
}

/// Available, not progressing, not degraded
pub fn healthy_conditions() -> Vec<OperandCondition> {
    vec![
        OperandCondition::new("Available", "True", "Ready", "ready"),
        OperandCondition::new("Progressing", "False", "Ready", "ready"),
        OperandCondition::new("Degraded", "False", "Ready", "ready"),
    ]
}
