// Engine errors
use thiserror::Error;

/// Unrecoverable errors. Numerical non-convergence is *not* one of
/// these; it lands in the ConvergenceReport instead.
#[derive(Error, Debug)]
pub enum ReliabilityError {
    /// Distribution parameters out of range
    #[error("Invalid distribution: {0}")]
    InvalidDistribution(String),

    /// A bounded root search could not bracket a sign change
    #[error("Root search for {subject} failed to bracket a sign change in [{low}, {high}]")]
    RootBracketing {
        subject: String,
        low: f64,
        high: f64,
    },

    /// Operation not defined for this distribution family
    #[error("Unsupported operation for {family}: {operation}")]
    Unsupported {
        family: &'static str,
        operation: &'static str,
    },

    /// Settings rejected before the run started
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// Z-function expression failed to parse or evaluate
    #[error("Z-function error: {0}")]
    Expression(String),

    /// Project configuration mismatch (unknown stochast symbol, size mismatch)
    #[error("Project error: {0}")]
    Project(String),
}
