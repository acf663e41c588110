use lazy_static::lazy_static;
use prometheus::{core::Collector, opts, IntCounter, IntCounterVec, IntGauge, Registry};
use tracing::error;

lazy_static! {
    static ref JOBS_ACTIVE: IntGauge =
        IntGauge::new("handoff_jobs_active", "Jobs currently executing").unwrap();
    static ref PROTECTED_JOBS: IntGauge = IntGauge::new(
        "handoff_protected_jobs",
        "Jobs currently inside a human input flow"
    )
    .unwrap();
    static ref INPUT_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!(
            "handoff_input_requests_total",
            "Human input requests issued grouped by kind"
        ),
        &["kind"]
    )
    .unwrap();
    static ref INPUT_TIMEOUTS_TOTAL: IntCounter = IntCounter::new(
        "handoff_input_timeouts_total",
        "Human input requests that expired unanswered"
    )
    .unwrap();
    static ref SENSITIVE_SUBSTITUTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!(
            "handoff_sensitive_substitutions_total",
            "Fill values replaced by the sensitive-field guard grouped by rule"
        ),
        &["rule"]
    )
    .unwrap();
    static ref CREDENTIAL_OUTCOMES_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!(
            "handoff_credential_outcomes_total",
            "Classified credential-bearing actions grouped by outcome"
        ),
        &["outcome"]
    )
    .unwrap();
    static ref DRIVER_FAULTS_TOTAL: IntCounter =
        IntCounter::new("handoff_driver_faults_total", "Driver execution faults").unwrap();
    static ref ORACLE_TOKENS_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!(
            "handoff_oracle_tokens_total",
            "Tokens reported by the action oracle grouped by direction"
        ),
        &["direction"]
    )
    .unwrap();
    static ref RESULTS_EXTRACTED_TOTAL: IntCounter = IntCounter::new(
        "handoff_results_extracted_total",
        "Result items collected from extract actions"
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register engine metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, JOBS_ACTIVE.clone());
    register(registry, PROTECTED_JOBS.clone());
    register(registry, INPUT_REQUESTS_TOTAL.clone());
    register(registry, INPUT_TIMEOUTS_TOTAL.clone());
    register(registry, SENSITIVE_SUBSTITUTIONS_TOTAL.clone());
    register(registry, CREDENTIAL_OUTCOMES_TOTAL.clone());
    register(registry, DRIVER_FAULTS_TOTAL.clone());
    register(registry, ORACLE_TOKENS_TOTAL.clone());
    register(registry, RESULTS_EXTRACTED_TOTAL.clone());
}

pub fn job_started() {
    JOBS_ACTIVE.inc();
}

pub fn job_finished() {
    JOBS_ACTIVE.dec();
}

pub fn set_protected_jobs(count: usize) {
    PROTECTED_JOBS.set(count as i64);
}

pub fn record_input_request(kind: &str) {
    INPUT_REQUESTS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_input_timeout() {
    INPUT_TIMEOUTS_TOTAL.inc();
}

pub fn record_substitution(rule: &str) {
    SENSITIVE_SUBSTITUTIONS_TOTAL
        .with_label_values(&[rule])
        .inc();
}

pub fn record_credential_outcome(outcome: &str) {
    CREDENTIAL_OUTCOMES_TOTAL
        .with_label_values(&[outcome])
        .inc();
}

pub fn record_driver_fault() {
    DRIVER_FAULTS_TOTAL.inc();
}

pub fn record_token_usage(input_tokens: u64, output_tokens: u64) {
    ORACLE_TOKENS_TOTAL
        .with_label_values(&["input"])
        .inc_by(input_tokens);
    ORACLE_TOKENS_TOTAL
        .with_label_values(&["output"])
        .inc_by(output_tokens);
}

pub fn record_results_extracted(count: usize) {
    RESULTS_EXTRACTED_TOTAL.inc_by(count as u64);
}
