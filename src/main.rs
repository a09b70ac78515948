use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use experiment_operator::{
    argocd::{ArgoClient, KubeControlPlane, TailscaleOAuth, DEFAULT_ARGOCD_NAMESPACE},
    components::CatalogResolver,
    controller::{self, DEFAULT_WORKFLOW_NAMESPACE},
    crd::Experiment,
    results::{GitHubResultCommitter, ResultCommitter, ResultStore, S3ResultStore},
    Error,
};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version and build information
    Version,
    /// Show cluster information
    Info(InfoArgs),
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Operator namespace
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Namespace where Argo CD Applications and cluster secrets live
    #[arg(long, env = "ARGOCD_NAMESPACE", default_value = DEFAULT_ARGOCD_NAMESPACE)]
    argocd_namespace: String,

    /// Namespace of workflows referenced without an explicit namespace
    #[arg(long, env = "WORKFLOW_NAMESPACE", default_value = DEFAULT_WORKFLOW_NAMESPACE)]
    workflow_namespace: String,

    /// Component catalog mapping app/config names to sources
    #[arg(long, env = "COMPONENT_CATALOG", default_value = "/etc/experiment-operator/catalog.yaml")]
    catalog: String,

    /// OAuth client id handed to the tailscale operator
    #[arg(long, env = "TAILSCALE_CLIENT_ID", default_value = "")]
    tailscale_client_id: String,

    /// OAuth client secret handed to the tailscale operator
    #[arg(long, env = "TAILSCALE_CLIENT_SECRET", default_value = "", hide_env_values = true)]
    tailscale_client_secret: String,

    /// Token for committing experiment results; publishing is disabled when unset
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Results repository as owner/repo
    #[arg(long, env = "RESULTS_REPO", default_value = "illmadecoder/illm-k8s-ai-lab")]
    results_repo: String,

    /// Branch receiving result commits
    #[arg(long, env = "RESULTS_BRANCH", default_value = "main")]
    results_branch: String,

    /// Directory within the results repository
    #[arg(long, env = "RESULTS_PATH", default_value = "site/data")]
    results_path: String,

    /// S3-compatible endpoint (host:port or URL) for result summaries; storage is disabled when unset
    #[arg(long, env = "RESULTS_STORE_ENDPOINT")]
    results_store_endpoint: Option<String>,

    /// Bucket receiving result summaries
    #[arg(long, env = "RESULTS_STORE_BUCKET", default_value = "experiment-results")]
    results_store_bucket: String,

    #[arg(long, env = "RESULTS_STORE_ACCESS_KEY", default_value = "", hide_env_values = true)]
    results_store_access_key: String,

    #[arg(long, env = "RESULTS_STORE_SECRET_KEY", default_value = "", hide_env_values = true)]
    results_store_secret_key: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// Operator namespace
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "default")]
    namespace: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("Experiment Operator v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            Ok(())
        }
        Commands::Info(info_args) => run_info(info_args).await,
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_info(args: InfoArgs) -> Result<(), Error> {
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    let api: kube::Api<Experiment> = kube::Api::namespaced(client, &args.namespace);
    let experiments = api
        .list(&Default::default())
        .await
        .map_err(Error::KubeError)?;

    println!("Experiments: {}", experiments.items.len());
    for experiment in &experiments.items {
        let phase = experiment
            .status
            .as_ref()
            .map(|s| s.phase.to_string())
            .unwrap_or_else(|| "Pending".to_string());
        println!(
            "  {} ({} targets): {}",
            experiment.metadata.name.as_deref().unwrap_or("<unnamed>"),
            experiment.spec.targets.len(),
            phase
        );
    }
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let (text_layer, json_layer) = match format {
        LogFormat::Text => (Some(fmt::layer().with_target(true)), None),
        LogFormat::Json => (None, Some(fmt::layer().json().with_target(true))),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(text_layer)
        .with(json_layer);

    // Only enable OTEL if an endpoint is provided
    let otel_enabled = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok();

    if otel_enabled {
        let otel_layer = experiment_operator::telemetry::init_telemetry(&registry);
        registry.with(otel_layer).init();
        info!("OpenTelemetry tracing initialized");
    } else {
        registry.init();
        info!("OpenTelemetry tracing disabled (OTEL_EXPORTER_OTLP_ENDPOINT not set)");
    }
}

fn build_committer(args: &RunArgs) -> Result<Option<Arc<dyn ResultCommitter>>, Error> {
    let Some(token) = args.github_token.as_deref().filter(|t| !t.is_empty()) else {
        warn!("GITHUB_TOKEN not set, experiment results will not be published");
        return Ok(None);
    };

    let committer = GitHubResultCommitter::new(
        token,
        &args.results_repo,
        &args.results_branch,
        &args.results_path,
    )?;
    info!(
        "Publishing experiment results to {}:{}/{}",
        committer.repo_path(),
        args.results_branch,
        args.results_path
    );
    Ok(Some(Arc::new(committer)))
}

fn build_store(args: &RunArgs) -> Result<Option<Arc<dyn ResultStore>>, Error> {
    let Some(endpoint) = args.results_store_endpoint.as_deref().filter(|e| !e.is_empty()) else {
        return Ok(None);
    };

    let store = S3ResultStore::new(
        endpoint,
        &args.results_store_access_key,
        &args.results_store_secret_key,
        &args.results_store_bucket,
    )?;
    info!("Storing experiment results in bucket {} at {}", store.bucket(), endpoint);
    Ok(Some(Arc::new(store)))
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    init_tracing(args.log_format);

    info!(
        "Starting Experiment Operator v{} in namespace {}",
        env!("CARGO_PKG_VERSION"),
        args.namespace
    );

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    let resolver = Arc::new(CatalogResolver::from_file(&args.catalog).await?);
    let control_plane = Arc::new(KubeControlPlane::new(
        client.clone(),
        &args.argocd_namespace,
    ));

    let oauth = TailscaleOAuth {
        client_id: args.tailscale_client_id.clone(),
        client_secret: args.tailscale_client_secret.clone(),
    };
    if !oauth.is_configured() {
        warn!("Tailscale OAuth credentials not set, tailscale operator will use chart defaults");
    }

    let state = Arc::new(controller::ControllerState {
        client: client.clone(),
        argo: ArgoClient::new(control_plane, resolver),
        oauth,
        workflow_namespace: args.workflow_namespace.clone(),
        committer: build_committer(&args)?,
        store: build_store(&args)?,
    });

    // Run the main controller loop
    let result = controller::run_controller(state).await;

    // Flush any remaining traces
    experiment_operator::telemetry::shutdown_telemetry();

    result
}
