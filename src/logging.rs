//! # Structured Logging Module
//!
//! Console logging for every environment, plus an optional JSON file layer when
//! `logging.log_dir` is configured. `RUST_LOG` overrides the configured level.

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

use crate::config::{LogFormat, LoggingConfig};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging from the default configuration
pub fn init_structured_logging() {
    init_logging(&LoggingConfig::default());
}

/// Initialize structured logging; later calls are no-ops
pub fn init_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = std::env::var("RUST_LOG")
            .unwrap_or_else(|_| resolve_log_level(&config.level, &environment));

        let console_layer = match config.format {
            LogFormat::Json => fmt::layer()
                .with_target(true)
                .with_level(true)
                .json()
                .with_filter(EnvFilter::new(&log_level))
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(EnvFilter::new(&log_level))
                .boxed(),
        };

        let (file_layer, guard, log_path) = match config.log_dir.as_deref().map(PathBuf::from) {
            Some(log_dir) if fs::create_dir_all(&log_dir).is_ok() => {
                let pid = process::id();
                let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
                let log_filename = format!("{environment}.{pid}.{timestamp}.log");
                let log_path = log_dir.join(&log_filename);

                let file_appender = tracing_appender::rolling::never(&log_dir, log_filename);
                let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
                let layer = fmt::layer()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(EnvFilter::new(&log_level))
                    .boxed();
                (Some(layer), Some(guard), Some(log_path))
            }
            _ => (None, None, None),
        };

        // A global subscriber may already be set by an embedding application or test
        if tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            log_file = ?log_path,
            "Structured logging initialized"
        );

        // The file writer flushes for as long as the guard lives
        if let Some(guard) = guard {
            std::mem::forget(guard);
        }
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("FORMATION_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Configured level, or the environment default when unset
fn resolve_log_level(configured: &str, environment: &str) -> String {
    if configured.trim().is_empty() {
        get_log_level(environment)
    } else {
        configured.to_string()
    }
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log an applied assignment transition
pub fn log_assignment_transition(
    assignment_id: Uuid,
    formation_id: Uuid,
    from_state: &str,
    to_state: Option<&str>,
    event: &str,
    operation_id: Option<u64>,
) {
    tracing::info!(
        assignment_id = %assignment_id,
        formation_id = %formation_id,
        from_state = %from_state,
        to_state = to_state.unwrap_or("<removed>"),
        event = %event,
        operation_id = operation_id,
        timestamp = %Utc::now().to_rfc3339(),
        "ASSIGNMENT_TRANSITION"
    );
}

/// Log a delivered (or failed) notification
pub fn log_notification_dispatch(
    formation_id: Uuid,
    assignment_id: Option<Uuid>,
    destination: &str,
    status: &str,
    status_code: Option<u16>,
    duration_ms: Option<u64>,
) {
    tracing::info!(
        formation_id = %formation_id,
        assignment_id = ?assignment_id,
        destination = %destination,
        status = %status,
        status_code = status_code,
        duration_ms = duration_ms,
        timestamp = %Utc::now().to_rfc3339(),
        "NOTIFICATION_DISPATCH"
    );
}

/// Log the result of one constraint evaluation
pub fn log_constraint_evaluation(
    constraint: &str,
    operator: &str,
    join_point: &str,
    outcome: &str,
    details: Option<&str>,
) {
    tracing::debug!(
        constraint = %constraint,
        operator = %operator,
        join_point = %join_point,
        outcome = %outcome,
        details = details,
        "CONSTRAINT_EVALUATION"
    );
}

/// Log a management or lifecycle operation on a formation
pub fn log_formation_operation(
    operation: &str,
    formation_id: Uuid,
    participant: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        formation_id = %formation_id,
        participant = participant,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "FORMATION_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}
