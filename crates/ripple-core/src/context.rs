//! # Production Context
//!
//! The per-invocation handle passed to a stage's transform.
//!
//! A transform emits zero or more outputs through the context without knowing
//! the final table shape. The driver freezes the emitted values into entries
//! once the transform returns, attaching the elapsed time it measured itself
//! and provenance back to the triggering input entry.
//!
//! The context also carries the generation's cancellation signal. Transforms
//! with large fan-outs call [`ProductionContext::checkpoint`] between outputs;
//! on cancellation the partial output of that invocation is discarded.

use crate::comparer::panic_message;
use crate::types::{Diagnostic, DiagnosticKind, EntryKey, HostOutput, Severity};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

// =============================================================================
// CANCELLATION
// =============================================================================

/// Cooperative, generation-scoped cancellation signal.
///
/// Cloning yields another handle to the same signal.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// =============================================================================
// TRANSFORM ERRORS
// =============================================================================

/// Error a transform may return for one input entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    /// The transform could not produce output for this input.
    ///
    /// Recorded as an entry-local fault; the generation continues.
    #[error("{0}")]
    Failed(String),

    /// The transform observed cancellation.
    ///
    /// Cancels the generation when the driver's token is cancelled; otherwise
    /// it is treated as a fault of the transform.
    #[error("operation was cancelled")]
    Cancelled,

    /// An unrecoverable condition (e.g. resource exhaustion).
    ///
    /// Aborts the whole generation; the last completed generation stays visible.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl TransformError {
    /// Convenience constructor for [`TransformError::Failed`].
    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}

// =============================================================================
// PRODUCTION CONTEXT
// =============================================================================

/// Append-only output builder for one transform invocation.
pub struct ProductionContext<'a, U> {
    stage: &'a str,
    key: &'a EntryKey,
    roots: &'a [Arc<str>],
    token: &'a CancellationToken,
    outputs: Vec<U>,
}

impl<'a, U> ProductionContext<'a, U> {
    pub(crate) fn new(
        stage: &'a str,
        key: &'a EntryKey,
        roots: &'a [Arc<str>],
        token: &'a CancellationToken,
    ) -> Self {
        Self {
            stage,
            key,
            roots,
            token,
            outputs: Vec::new(),
        }
    }

    /// Emit one output value. Outputs keep the order in which they are emitted.
    pub fn emit(&mut self, value: U) {
        self.outputs.push(value);
    }

    /// Emit every value of an iterator, in order.
    pub fn emit_all(&mut self, values: impl IntoIterator<Item = U>) {
        self.outputs.extend(values);
    }

    /// Number of outputs emitted so far.
    pub fn emitted(&self) -> usize {
        self.outputs.len()
    }

    /// Whether the generation has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Return `Err(TransformError::Cancelled)` if the generation has been cancelled.
    pub fn checkpoint(&self) -> Result<(), TransformError> {
        if self.token.is_cancelled() {
            Err(TransformError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Name of the stage being evaluated.
    pub fn stage_name(&self) -> &str {
        self.stage
    }

    /// Key of the input entry that triggered this invocation.
    pub fn input_key(&self) -> &EntryKey {
        self.key
    }

    /// Root input keys the triggering entry descends from.
    pub fn roots(&self) -> &[Arc<str>] {
        self.roots
    }

    pub(crate) fn into_outputs(self) -> Vec<U> {
        self.outputs
    }
}

impl ProductionContext<'_, HostOutput> {
    /// Emit a host output artifact.
    pub fn add_output(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.emit(HostOutput::new(key, value));
    }
}

impl ProductionContext<'_, Diagnostic> {
    /// Report a diagnostic attributed to this stage and the triggering roots.
    pub fn report(&mut self, severity: Severity, message: impl Into<String>) {
        let diagnostic = Diagnostic::new(
            severity,
            DiagnosticKind::Reported,
            self.stage,
            self.roots,
            message,
        );
        self.emit(diagnostic);
    }
}

// =============================================================================
// GUARDED INVOCATION
// =============================================================================

/// Result of running one transform invocation.
///
/// Reconciliation needs to tell "no output" apart from "cancelled" and
/// "faulted", so every invocation is folded into one of these.
#[derive(Debug)]
pub(crate) enum Produced<U> {
    Values(Vec<U>),
    Faulted(String),
    Cancelled,
    Fatal(String),
}

/// Invoke a transform with panics contained.
///
/// A `Cancelled` error only cancels the generation when the token is actually
/// cancelled; a transform that reports cancellation on its own is faulted.
pub(crate) fn invoke<U, F>(mut ctx: ProductionContext<'_, U>, f: F) -> Produced<U>
where
    F: FnOnce(&mut ProductionContext<'_, U>) -> Result<(), TransformError>,
{
    let token = ctx.token.clone();
    match catch_unwind(AssertUnwindSafe(|| f(&mut ctx))) {
        Ok(Ok(())) => Produced::Values(ctx.into_outputs()),
        Ok(Err(TransformError::Cancelled)) if token.is_cancelled() => Produced::Cancelled,
        Ok(Err(TransformError::Cancelled)) => Produced::Faulted(
            "transform reported cancellation but the generation was not cancelled".to_string(),
        ),
        Ok(Err(TransformError::Failed(message))) => Produced::Faulted(message),
        Ok(Err(TransformError::Fatal(message))) => Produced::Fatal(message),
        Err(payload) => Produced::Faulted(format!(
            "transform panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

// =============================================================================
// TESTS
// =============================================================================
