use std::path::PathBuf;
use std::time::Duration;

use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use clap::Parser;

pub use hyperconverged_operator::{self, telemetry, OperatorEnvironment, State};

#[derive(Debug, clap::Parser)]
struct Arguments {
    /// Namespace of the HyperConverged resource and of the namespaced operands
    #[arg(long = "operator-namespace", env = "OPERATOR_NAMESPACE")]
    operator_namespace: String,

    #[arg(long = "hco-version", env = "HCO_KV_IO_VERSION", default_value = "1.6.0")]
    hco_version: String,

    #[arg(long = "kubevirt-version", env = "KUBEVIRT_VERSION", default_value = "1.6.0")]
    kubevirt_version: String,

    #[arg(long = "cdi-version", env = "CDI_VERSION", default_value = "1.6.0")]
    cdi_version: String,

    #[arg(
        long = "network-addons-version",
        env = "NETWORK_ADDONS_VERSION",
        default_value = "1.6.0"
    )]
    network_addons_version: String,

    #[arg(long = "ssp-version", env = "SSP_VERSION", default_value = "1.6.0")]
    ssp_version: String,

    /// Directory holding ConsoleQuickStart manifests to deploy
    #[arg(
        long = "quick-start-files-location",
        env = "QUICK_START_FILES_LOCATION",
        value_name = "DIR"
    )]
    quick_start_files_location: Option<PathBuf>,

    #[arg(
        long = "http-listen-address",
        env = "HTTP_LISTEN_ADDRESS",
        default_value = "0.0.0.0:8080"
    )]
    http_listen_address: String,

    #[arg(
        long = "reconcile-timeout-seconds",
        env = "RECONCILE_TIMEOUT_SECONDS",
        default_value_t = 120
    )]
    reconcile_timeout_seconds: u64,
}

impl Arguments {
    fn environment(&self) -> OperatorEnvironment {
        OperatorEnvironment {
            operator_namespace: self.operator_namespace.clone(),
            hco_version: self.hco_version.clone(),
            kubevirt_version: self.kubevirt_version.clone(),
            cdi_version: self.cdi_version.clone(),
            network_addons_version: self.network_addons_version.clone(),
            ssp_version: self.ssp_version.clone(),
            quick_start_files_location: self.quick_start_files_location.clone(),
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout_seconds),
        }
    }
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let args: Arguments = Arguments::parse();

    // Initiatilize Kubernetes controller state
    let state = State::new(args.environment());
    let client = kube::Client::try_default().await?;
    let controller = hyperconverged_operator::controllers::hyperconverged::run(client, state.clone());
    tokio::pin!(controller);

    // Start web server
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
    })
    .bind(&args.http_listen_address)?
    .shutdown_timeout(5)
    .run();

    tokio::pin!(server);

    // Both runtimes implements graceful shutdown, so poll until both are done
    tokio::join!(controller, server).1?;
    Ok(())
}
