use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

pub mod hyperconverged;

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    /// Outcome of the most recent reconcile of the HyperConverged singleton
    pub last_result: Option<String>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            last_result: None,
        }
    }
}

/// Deployment-provided settings the reconciler depends on
#[derive(Clone, Debug)]
pub struct OperatorEnvironment {
    /// Namespace of the operator, the HyperConverged singleton and namespaced operands
    pub operator_namespace: String,
    /// Version the operator drives the installation to
    pub hco_version: String,
    pub kubevirt_version: String,
    pub cdi_version: String,
    pub network_addons_version: String,
    pub ssp_version: String,
    /// Directory with ConsoleQuickStart manifests to deploy, if any
    pub quick_start_files_location: Option<PathBuf>,
    /// Deadline for a single reconcile
    pub reconcile_timeout: Duration,
}

impl Default for OperatorEnvironment {
    fn default() -> Self {
        Self {
            operator_namespace: "kubevirt-hyperconverged".into(),
            hco_version: "1.6.0".into(),
            kubevirt_version: "1.6.0".into(),
            cdi_version: "1.6.0".into(),
            network_addons_version: "1.6.0".into(),
            ssp_version: "1.6.0".into(),
            quick_start_files_location: None,
            reconcile_timeout: Duration::from_secs(120),
        }
    }
}

/// State shared between the controller and the web server
#[derive(Clone)]
pub struct State {
    /// Diagnostics populated by the reconciler
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    pub registry: prometheus::Registry,
    /// Settings read from the command line and environment
    environment: OperatorEnvironment,
}

/// State wrapper around the controller outputs for the web server
impl State {
    pub fn new(environment: OperatorEnvironment) -> Self {
        Self {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            registry: prometheus::Registry::default(),
            environment,
        }
    }

    pub fn environment(&self) -> &OperatorEnvironment {
        &self.environment
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }
}
