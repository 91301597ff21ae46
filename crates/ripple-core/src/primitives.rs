//! # Engine Primitives
//!
//! Hardcoded limits and reserved names for the Ripple engine.
//!
//! These are compiled into the binary and are immutable at runtime. Limits
//! that a deployment may want to tune live in
//! [`DriverOptions`](crate::driver::DriverOptions) instead.

/// Name of the built-in stage that exposes the root input feed.
pub const ROOTS_STAGE_NAME: &str = "roots";

/// Maximum length of a stage name.
pub const MAX_STAGE_NAME_LENGTH: usize = 128;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length for root input keys.
///
/// Keys are commonly file paths; anything longer is almost certainly malformed.
pub const MAX_ROOT_KEY_LENGTH: usize = 1024;

/// Maximum length for root input values (16 MB).
pub const MAX_ROOT_VALUE_LENGTH: usize = 16 * 1024 * 1024;

/// Maximum number of root inputs in a single generation.
pub const MAX_ROOT_INPUTS: usize = 100_000;

// =============================================================================
// RESOURCE LIMITS
// =============================================================================

/// Default ceiling on the number of live entries a single stage table may hold.
///
/// Exceeding it is a catastrophic fault: the generation is aborted and the
/// last completed generation stays visible.
pub const DEFAULT_MAX_TABLE_ENTRIES: usize = 1_000_000;
