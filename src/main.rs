use clap::{ArgAction, Parser};
use workload_launcher::{
    config::{ConfigResult, LauncherConfig, LauncherConfigBuilder},
    server,
};

#[derive(Parser, Debug)]
#[command(name = "workload-launcher")]
#[command(about = "Claims queued workloads and launches them as cluster pods")]
#[command(long_about = r#"
Workload launcher - claims workloads from the registry and runs each one as a pod

Examples:
  # Launch into the default namespace
  workload-launcher --dataplane-id dp-east-1 \
    --registry-url http://registry:8001 --image registry.local/sync-worker:1.4

  # One pod per connection, newest request wins
  workload-launcher --dataplane-id dp-east-1 --image sync-worker:1.4 \
    --mutex-label-keys connection_id --mutex-policy newest_wins
"#)]
struct CliArgs {
    /// Identity of this launcher instance in the registry
    #[arg(long, env = "DATAPLANE_ID")]
    dataplane_id: String,

    #[arg(long, default_value = "http://localhost:8001")]
    registry_url: String,

    #[arg(long, env = "REGISTRY_API_KEY")]
    registry_api_key: Option<String>,

    /// Kubernetes namespace for launched pods; defaults to the client's namespace
    #[arg(long)]
    namespace: Option<String>,

    /// Container image every workload pod runs
    #[arg(long)]
    image: String,

    #[arg(long)]
    image_pull_policy: Option<String>,

    #[arg(long)]
    service_account: Option<String>,

    #[arg(long, default_value_t = 1000)]
    queue_size: usize,

    #[arg(long, default_value_t = 32)]
    max_concurrent_launches: usize,

    #[arg(long, default_value_t = false)]
    disable_load_shed: bool,

    #[arg(long, default_value_t = 64)]
    max_inflight_launches: usize,

    #[arg(long, default_value_t = 500)]
    max_cluster_units: usize,

    #[arg(long, default_value_t = 10)]
    pressure_sample_interval_secs: u64,

    /// Label keys whose value forms the mutex key, checked in order
    #[arg(long, num_args = 1.., default_values_t = vec!["connection_id".to_string()])]
    mutex_label_keys: Vec<String>,

    #[arg(long, default_value = "newest_wins", value_parser = ["newest_wins", "reject_new"])]
    mutex_policy: String,

    #[arg(long, default_value = "launcher.io/architecture")]
    architecture_label_key: String,

    #[arg(long, default_value = "amd64", value_parser = ["amd64", "arm64"])]
    default_architecture: String,

    #[arg(long, default_value_t = 10)]
    registry_timeout_secs: u64,

    #[arg(long, default_value_t = 30)]
    executor_timeout_secs: u64,

    /// Attempts for each status report to the registry
    #[arg(long, default_value_t = 5)]
    max_report_retries: u32,

    #[arg(long, default_value_t = false)]
    disable_poller: bool,

    #[arg(long, default_value_t = 5)]
    poll_interval_secs: u64,

    #[arg(long, default_value_t = 60)]
    resubmit_after_secs: u64,

    #[arg(long, default_value_t = false)]
    skip_rehydration: bool,

    #[arg(long, default_value_t = 180)]
    shutdown_grace_period_secs: u64,

    #[arg(long, default_value = "0.0.0.0")]
    prometheus_host: String,

    #[arg(long, default_value_t = 29000)]
    prometheus_port: u16,

    #[arg(long, default_value_t = false)]
    disable_metrics: bool,

    #[arg(long)]
    log_dir: Option<String>,

    #[arg(long, default_value = "info", value_parser = ["debug", "info", "warn", "error"])]
    log_level: String,

    #[arg(long, action = ArgAction::SetTrue)]
    log_json: bool,
}

impl CliArgs {
    fn to_launcher_config(&self) -> ConfigResult<LauncherConfig> {
        let mut builder = LauncherConfigBuilder::new()
            .dataplane_id(&self.dataplane_id)
            .registry_url(&self.registry_url)
            .registry_api_key(self.registry_api_key.clone())
            .namespace(self.namespace.clone())
            .image(&self.image)
            .image_pull_policy(self.image_pull_policy.clone())
            .service_account(self.service_account.clone())
            .queue_size(self.queue_size)
            .max_concurrent_launches(self.max_concurrent_launches)
            .load_shed_enabled(!self.disable_load_shed)
            .max_inflight_launches(self.max_inflight_launches)
            .max_cluster_units(self.max_cluster_units)
            .pressure_sample_interval_secs(self.pressure_sample_interval_secs)
            .mutex_label_keys(self.mutex_label_keys.clone())
            .mutex_policy_str(&self.mutex_policy)
            .architecture_label_key(&self.architecture_label_key)
            .default_architecture_str(&self.default_architecture)
            .registry_timeout_secs(self.registry_timeout_secs)
            .executor_timeout_secs(self.executor_timeout_secs)
            .max_report_retries(self.max_report_retries)
            .poller_enabled(!self.disable_poller)
            .poll_interval_secs(self.poll_interval_secs)
            .resubmit_after_secs(self.resubmit_after_secs)
            .rehydrate_on_startup(!self.skip_rehydration)
            .shutdown_grace_period_secs(self.shutdown_grace_period_secs)
            .log_dir(self.log_dir.clone())
            .log_level(Some(self.log_level.clone()))
            .log_json(self.log_json);

        if !self.disable_metrics {
            builder = builder.metrics(&self.prometheus_host, self.prometheus_port);
        }

        builder.build()
    }
}

fn main() -> anyhow::Result<()> {
    let cli_args = CliArgs::parse();

    println!("Workload launcher starting...");
    println!("Dataplane: {}", cli_args.dataplane_id);
    println!("Registry: {}", cli_args.registry_url);
    println!(
        "Mutex: {:?} ({})",
        cli_args.mutex_label_keys, cli_args.mutex_policy
    );

    let config = cli_args.to_launcher_config()?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move { server::startup(config).await })
}
