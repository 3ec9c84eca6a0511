//! Structured observability hooks for promotion lifecycle events.
//!
//! This module provides:
//! - A run-scoped span via [`promotion_span`], attached to the engine future
//!   with `Instrument` so it follows the run across await points
//! - Emission functions for key lifecycle events: start, publication, skip,
//!   poll transitions, group and run completion
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`).

use tracing::{info, warn, Span};

/// Span tagged with the activity key of one promotion run.
///
/// # Example
///
/// ```ignore
/// engine.run(&doc, &request, cancel)
///     .instrument(promotion_span("myorg-myapp-master-1"))
///     .await;
/// ```
pub fn promotion_span(activity_key: &str) -> Span {
    tracing::info_span!("promote.run", activity_key = %activity_key)
}

/// Emit event: promotion started.
pub fn emit_promotion_started(application: &str, version: &str, targets: usize, groups: usize) {
    info!(
        event = "promotion.started",
        application = %application,
        version = %version,
        targets = targets,
        groups = groups,
    );
}

/// Emit event: pull request created or updated for a group.
pub fn emit_group_published(repo: &str, environments: &[String], pull_request: &str) {
    info!(
        event = "group.published",
        repo = %repo,
        environments = %environments.join(","),
        pull_request = %pull_request,
    );
}

/// Emit event: group had nothing to change.
pub fn emit_group_skipped(repo: &str, environments: &[String]) {
    info!(
        event = "group.skipped",
        repo = %repo,
        environments = %environments.join(","),
    );
}

/// Emit event: group reached a terminal outcome.
pub fn emit_group_finished(repo: &str, success: bool, reason: Option<&str>) {
    info!(
        event = "group.finished",
        repo = %repo,
        success = success,
        reason = reason.unwrap_or(""),
    );
}

/// Emit event: poll state changed.
pub fn emit_poll_transition(pull_request: &str, from: &str, to: &str) {
    info!(event = "poll.transition", pull_request = %pull_request, from = from, to = to);
}

/// Emit event: run finished with duration and verdict.
pub fn emit_promotion_finished(activity_key: &str, duration_ms: u64, groups: usize, success: bool) {
    info!(
        event = "promotion.finished",
        activity_key = %activity_key,
        duration_ms = duration_ms,
        groups = groups,
        success = success,
    );
}

/// Emit event: activity store error (warning level).
pub fn emit_activity_store_error(activity_key: &str, error: &dyn std::fmt::Display) {
    warn!(event = "activity.store_error", activity_key = %activity_key, error = %error);
}
