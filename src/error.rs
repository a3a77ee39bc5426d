use std::path::PathBuf;

/// An error type for clear diagnostics.
///
/// Configuration variants are raised immediately by the setter or the run
/// start that detects them. Evaluation and numeric variants abort a running
/// simulation; they are distinct from a simulation that ends in
/// [`Status::Fail`](crate::Status::Fail) by exhausting its iteration budget.
#[derive(Debug, thiserror::Error)]
pub enum BlockOptError {
    #[error("the sample count must be a positive even integer (s = 2w), got {0}")]
    InvalidSamples(usize),
    #[error("{name} must be positive and finite, got {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("the maximum number of iterations must be a positive integer")]
    InvalidMaxIterations,
    #[error("{samples} sample directions cannot be drawn in dimension {dimension}")]
    SamplesExceedDimension { samples: usize, dimension: usize },
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("model {model:?} has no {field} assigned")]
    Unset { model: String, field: &'static str },
    #[error("model {0:?} must be final before a simulation can use it")]
    NotFinal(String),
    #[error("unable to create the model directory {path:?}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("the objective evaluated to {value} at iteration {iteration}")]
    ObjectiveFailure { iteration: usize, value: f64 },
    #[error("the gradient was NaN or infinite at iteration {iteration}")]
    GradientFailure { iteration: usize },

    #[error("the pseudoinverse eigendecomposition of a {size}x{size} secant system did not converge")]
    PseudoinverseFailure { size: usize },
    #[error("the trust-region subproblem failed: {0}")]
    SubproblemFailure(String),
    #[error("the trust-region radius collapsed to {radius:e} at iteration {iteration}")]
    RadiusCollapse { iteration: usize, radius: f64 },
}

impl BlockOptError {
    /// True for invalid options, unset model fields and other problems that
    /// are detected before any iteration runs.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidSamples(_)
                | Self::InvalidParameter { .. }
                | Self::InvalidMaxIterations
                | Self::SamplesExceedDimension { .. }
                | Self::DimensionMismatch { .. }
                | Self::Unset { .. }
                | Self::NotFinal(_)
                | Self::Directory { .. }
        )
    }

    /// True when the objective or gradient produced an unusable value.
    pub fn is_evaluation(&self) -> bool {
        matches!(
            self,
            Self::ObjectiveFailure { .. } | Self::GradientFailure { .. }
        )
    }

    /// True when a pseudoinverse, the subproblem solve or the radius control broke down.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::PseudoinverseFailure { .. }
                | Self::SubproblemFailure(_)
                | Self::RadiusCollapse { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BlockOptError>;
