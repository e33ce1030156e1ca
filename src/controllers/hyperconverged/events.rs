use async_trait::async_trait;
use kube::{
    runtime::events::{Event, EventType, Recorder},
    Resource,
};
use tracing::*;

use crate::resources::hyperconvergeds::HyperConverged;

/// Sink for Kubernetes events regarding the HyperConverged resource.
///
/// Emission is fire-and-forget: a failure to publish is logged and never fails a reconcile.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    async fn emit(&self, hc: &HyperConverged, type_: EventType, reason: &str, message: &str);
}

pub struct RecorderEventEmitter {
    recorder: Recorder,
}

impl RecorderEventEmitter {
    pub fn new(recorder: Recorder) -> Self {
        Self { recorder }
    }
}

#[async_trait]
impl EventEmitter for RecorderEventEmitter {
    async fn emit(&self, hc: &HyperConverged, type_: EventType, reason: &str, message: &str) {
        let event = Event {
            type_,
            reason: reason.into(),
            note: Some(message.into()),
            action: "Reconcile".into(),
            secondary: None,
        };
        if let Err(err) = self.recorder.publish(&event, &hc.object_ref(&())).await {
            warn!("failed to publish event {reason}: {err}");
        }
    }
}
