//! VIGIL - Alarm evaluation and priority escalation for device telemetry
//!
//! Detects configured event conditions that persist in stored telemetry,
//! confirms them as alarms, and escalates alarm priority as time passes
//! through a thread-safe, observable registry.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vigil::{AlarmEngine, AlarmRegistry, Config, TelemetryStore};
//!
//! # async fn run() -> vigil::Result<()> {
//! vigil::init();
//!
//! let config = Config::from_file("device.yaml")?;
//! let store = TelemetryStore::with_config(&config);
//! store.load_snapshot("telemetry.json")?;
//!
//! let registry = AlarmRegistry::start(config.registry.clone());
//! registry.add_watcher(|| println!("alarms changed"));
//!
//! let engine = AlarmEngine::new(Arc::clone(&registry));
//! engine.check_alarms(&store, None)?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// CORE MODULES
// ============================================================================

/// Error types and the crate `Result` alias
pub mod error;

/// Telemetry reading values
pub mod value;

/// Telemetry series, frame alignment and the data source interface
pub mod telemetry;

/// In-memory telemetry store
pub mod store;

/// Event bases, alarms and the priority matrix
pub mod alarms;

// ============================================================================
// EVALUATION
// ============================================================================

/// Per-frame condition evaluators
pub mod conditions;

/// Persistence scanning
pub mod persistence;

/// Event base dispatch and combinators
pub mod evaluator;

/// `check_alarms` entry point
pub mod engine;

// ============================================================================
// REGISTRY AND ESCALATION
// ============================================================================

/// Active alarm registry
pub mod registry;

/// Priority escalation timers
pub mod escalation;

// ============================================================================
// SUPPORT
// ============================================================================

/// Tag search cache
pub mod search;

/// YAML configuration
pub mod config;

pub use alarms::{
    Alarm, AlarmBase, AlarmCriticality, AlarmPriority, AlarmPriorityMatrix, Event, EventBase, EventCondition, EventId,
    SequenceInterval,
};
pub use config::Config;
pub use engine::{AlarmEngine, EventIdGenerator};
pub use error::{AlarmBaseFailure, Result, VigilError};
pub use evaluator::{EventEvaluator, Evaluation, Occurrence};
pub use registry::{AlarmRegistry, RegistryConfig, RegistryEvent};
pub use search::{SearchConfig, TagSearchCache};
pub use store::TelemetryStore;
pub use telemetry::{DataSource, Tag, TelemetrySeries, TelemetryWindow, Timestamp};
pub use value::Value;

// ============================================================================
// VERSION INFORMATION
// ============================================================================

/// VIGIL version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// VIGIL authors
pub const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// Build information stamped by build.rs
pub mod build_info {
    /// Git commit hash (if available)
    pub const GIT_HASH: Option<&str> = option_env!("GIT_HASH");

    /// Build timestamp
    pub const BUILD_TIMESTAMP: Option<&str> = option_env!("VIGIL_BUILD_TIMESTAMP");

    /// Rust version used for compilation
    pub const RUSTC_VERSION: Option<&str> = option_env!("VIGIL_RUST_VERSION");

    /// Target triple
    pub const TARGET: Option<&str> = option_env!("TARGET");

    /// Build profile (debug/release)
    pub const PROFILE: Option<&str> = option_env!("PROFILE");
}

// ============================================================================
// INITIALIZATION
// ============================================================================

/// Install the tracing subscriber
///
/// Honors `RUST_LOG`, defaulting to `vigil=info`. Calling it again, or after
/// another subscriber was installed, is harmless.
pub fn init() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vigil=info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false));

    if subscriber.try_init().is_ok() {
        tracing::debug!("VIGIL {} logging initialized", VERSION);
    }
}

/// Print version and build information
pub fn print_system_info() {
    let unknown = "unknown";
    println!("VIGIL System Information");
    println!("========================");
    println!("Version: {}", VERSION);
    println!("Authors: {}", AUTHORS);

    if let Some(git_hash) = build_info::GIT_HASH {
        println!("Git Hash: {}", git_hash);
    }

    println!("Build Target: {}", build_info::TARGET.unwrap_or(unknown));
    println!("Build Profile: {}", build_info::PROFILE.unwrap_or(unknown));
    println!("Build Time: {}", build_info::BUILD_TIMESTAMP.unwrap_or(unknown));
    println!("Rust Version: {}", build_info::RUSTC_VERSION.unwrap_or(unknown));
}
