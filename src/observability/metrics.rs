use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

use crate::protocols::DataplaneIdentity;

#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    pub port: u16,
    pub host: String,
    pub duration_buckets: Option<Vec<f64>>,
    pub latency_buckets: Option<Vec<f64>>,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            port: 29000,
            host: "0.0.0.0".to_string(),
            duration_buckets: None,
            latency_buckets: None,
        }
    }
}

pub fn init_metrics() {
    describe_counter!("workload_received", "Launch requests taken off the queue");
    describe_counter!(
        "workload_claimed",
        "Workloads claimed by this launcher instance"
    );
    describe_counter!(
        "workload_not_claimed",
        "Workloads whose claim was rejected, by reason"
    );
    describe_counter!(
        "workload_already_running",
        "Workloads skipped because they were already running"
    );
    describe_counter!(
        "workload_processed_successfully",
        "Workloads that left the pipeline successfully, by outcome (launched/skipped)"
    );
    describe_counter!(
        "workload_processed_unsuccessfully",
        "Workloads that failed permanently, by stage"
    );
    describe_counter!(
        "workload_transient_failure",
        "Workloads that failed with a retryable error, by stage"
    );
    describe_counter!(
        "workload_claims_rehydrated",
        "Claimed workloads re-injected on startup"
    );
    describe_counter!(
        "workload_pods_deleted_for_mutex_key",
        "Units deleted to enforce the one-unit-per-mutex-key rule"
    );
    describe_counter!(
        "workload_status_report_failures",
        "Registry status reports that failed after retries, by status"
    );

    describe_histogram!(
        "producer_to_consumer_start_latency",
        "Seconds between workload creation and the launcher picking it up"
    );
    describe_histogram!(
        "producer_to_pod_started_latency",
        "Seconds between workload creation and its unit being created"
    );
    describe_counter!(
        "launch_stage_started",
        "Stage executions started, by stage; the duration histogram counts completions"
    );
    describe_histogram!(
        "launch_stage_duration_seconds",
        "Stage duration in seconds by stage and outcome"
    );

    describe_gauge!("launch_queue_depth", "Launch requests waiting in the queue");
    describe_gauge!("launch_inflight", "Launch requests queued or in the pipeline");
    describe_gauge!(
        "cluster_active_units",
        "Last sampled number of active units on the cluster"
    );
}

/// Install the Prometheus recorder and HTTP listener. Every series carries a
/// `dataplane` label with this instance's identity.
pub fn start_prometheus(
    config: PrometheusConfig,
    dataplane: &DataplaneIdentity,
) -> Result<(), BuildError> {
    init_metrics();

    let duration_matcher = Matcher::Suffix(String::from("duration_seconds"));
    let duration_bucket: Vec<f64> = config.duration_buckets.unwrap_or_else(|| {
        vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0, 60.0,
        ]
    });

    let latency_matcher = Matcher::Suffix(String::from("latency"));
    let latency_bucket: Vec<f64> = config.latency_buckets.unwrap_or_else(|| {
        vec![
            0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0,
        ]
    });

    let ip_addr: IpAddr = config
        .host
        .parse()
        .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
    let socket_addr = SocketAddr::new(ip_addr, config.port);

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .upkeep_timeout(Duration::from_secs(5 * 60))
        .add_global_label("dataplane", dataplane.as_str())
        .set_buckets_for_metric(duration_matcher, &duration_bucket)?
        .set_buckets_for_metric(latency_matcher, &latency_bucket)?
        .install()
}

pub struct LauncherMetrics;

impl LauncherMetrics {
    pub fn record_received() {
        counter!("workload_received").increment(1);
    }

    pub fn record_claimed() {
        counter!("workload_claimed").increment(1);
    }

    pub fn record_not_claimed(reason: &str) {
        counter!("workload_not_claimed",
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    pub fn record_already_running(stage: &str) {
        counter!("workload_already_running",
            "stage" => stage.to_string()
        )
        .increment(1);
    }

    pub fn record_processed_successfully(outcome: &str) {
        counter!("workload_processed_successfully",
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }

    pub fn record_processed_unsuccessfully(stage: &str) {
        counter!("workload_processed_unsuccessfully",
            "stage" => stage.to_string()
        )
        .increment(1);
    }

    pub fn record_transient_failure(stage: &str) {
        counter!("workload_transient_failure",
            "stage" => stage.to_string()
        )
        .increment(1);
    }

    pub fn record_claims_rehydrated(count: usize) {
        counter!("workload_claims_rehydrated").increment(count as u64);
    }

    pub fn record_pods_deleted_for_mutex_key(count: usize) {
        counter!("workload_pods_deleted_for_mutex_key").increment(count as u64);
    }

    pub fn record_status_report_failure(status: &str) {
        counter!("workload_status_report_failures",
            "status" => status.to_string()
        )
        .increment(1);
    }

    pub fn record_consumer_start_latency(latency: Duration) {
        histogram!("producer_to_consumer_start_latency").record(latency.as_secs_f64());
    }

    pub fn record_pod_started_latency(latency: Duration) {
        histogram!("producer_to_pod_started_latency").record(latency.as_secs_f64());
    }

    pub fn record_stage_started(stage: &str) {
        counter!("launch_stage_started", "stage" => stage.to_string()).increment(1);
    }

    pub fn record_stage_duration(stage: &str, outcome: &str, duration: Duration) {
        histogram!("launch_stage_duration_seconds",
            "stage" => stage.to_string(),
            "outcome" => outcome.to_string()
        )
        .record(duration.as_secs_f64());
    }

    pub fn set_queue_depth(depth: usize) {
        gauge!("launch_queue_depth").set(depth as f64);
    }

    pub fn set_inflight(count: usize) {
        gauge!("launch_inflight").set(count as f64);
    }

    pub fn set_cluster_active_units(count: usize) {
        gauge!("cluster_active_units").set(count as f64);
    }
}
