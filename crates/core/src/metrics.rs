//! Prometheus metrics for the pipeline control plane.
//!
//! This module provides metrics for:
//! - Orchestration outcomes and status transitions
//! - Phase executions and collaborator calls
//! - Budget checks (including fail-open events)
//! - Dispatch and sweeper runs

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Orchestrator Metrics
// =============================================================================

/// Orchestration calls by outcome.
pub static ORCHESTRATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "feasibility_orchestrations_total",
            "Total orchestrate calls by outcome",
        ),
        &["outcome"], // "advanced", "retry_scheduled", "failed", "budget_exceeded", "already_terminal", "locked", "conflict"
    )
    .unwrap()
});

/// Status transitions written by the orchestrator.
pub static STATUS_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "feasibility_status_transitions_total",
            "Application status transitions",
        ),
        &["from", "to"],
    )
    .unwrap()
});

/// Applications that reached `complete`.
pub static APPLICATIONS_COMPLETED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "feasibility_applications_completed_total",
        "Total applications that completed the pipeline",
    )
    .unwrap()
});

/// Applications that reached `error`, by error code.
pub static APPLICATIONS_FAILED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "feasibility_applications_failed_total",
            "Total applications that ended in error",
        ),
        &["code"],
    )
    .unwrap()
});

// =============================================================================
// Phase Metrics
// =============================================================================

/// Phase executions by phase and result.
pub static PHASE_EXECUTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "feasibility_phase_executions_total",
            "Total phase executions",
        ),
        &["phase", "result"], // "success", "retryable", "fatal"
    )
    .unwrap()
});

/// Phase duration in seconds.
pub static PHASE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "feasibility_phase_duration_seconds",
            "Duration of pipeline phases",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["phase"],
    )
    .unwrap()
});

/// Collaborator calls by source and result.
pub static COLLABORATOR_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "feasibility_collaborator_calls_total",
            "External collaborator calls",
        ),
        &["source", "result"], // "success", "failure"
    )
    .unwrap()
});

// =============================================================================
// Budget Metrics
// =============================================================================

/// Budget checks by result.
pub static BUDGET_CHECKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("feasibility_budget_checks_total", "Budget checks"),
        &["result"], // "within", "exceeded"
    )
    .unwrap()
});

/// Budget checks that failed open because the call log was unavailable.
pub static BUDGET_FAIL_OPEN: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "feasibility_budget_check_fail_open_total",
        "Budget checks that failed open",
    )
    .unwrap()
});

// =============================================================================
// Dispatch & Sweeper Metrics
// =============================================================================

/// Dispatch runs.
pub static DISPATCH_RUNS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("feasibility_dispatch_runs_total", "Total dispatch pool runs").unwrap()
});

/// Items processed by the dispatch pool, by result.
pub static DISPATCH_ITEMS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "feasibility_dispatch_items_total",
            "Applications handled by the dispatch pool",
        ),
        &["result"], // "completed", "error", "panicked"
    )
    .unwrap()
});

/// Sweeper results by kind.
pub static SWEEP_RESULTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "feasibility_sweep_results_total",
            "Stalled-job sweeper results",
        ),
        &["result"], // "recovered", "triggered", "failed", "skipped", "exhausted"
    )
    .unwrap()
});

/// Returns all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(ORCHESTRATIONS_TOTAL.clone()),
        Box::new(STATUS_TRANSITIONS.clone()),
        Box::new(APPLICATIONS_COMPLETED.clone()),
        Box::new(APPLICATIONS_FAILED.clone()),
        Box::new(PHASE_EXECUTIONS.clone()),
        Box::new(PHASE_DURATION.clone()),
        Box::new(COLLABORATOR_CALLS.clone()),
        Box::new(BUDGET_CHECKS.clone()),
        Box::new(BUDGET_FAIL_OPEN.clone()),
        Box::new(DISPATCH_RUNS.clone()),
        Box::new(DISPATCH_ITEMS.clone()),
        Box::new(SWEEP_RESULTS.clone()),
    ]
}
