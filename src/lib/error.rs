use std::io;
use thiserror::Error;

/// Errors that can occur while transforming a toolpath.
#[derive(Error, Debug)]
pub enum WaveError {
    /// The parameter set can't drive a transform.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A surface or compensation computation was undefined.
    #[error("arithmetic error: {0}")]
    Arithmetic(#[from] ArithmeticError),

    /// A recognized command had a field that couldn't be read.
    #[error("parse error: {0}")]
    Parse(String),

    /// An error tied to a specific input line.
    #[error("line {line}: {source}\n    {text}")]
    AtLine {
        line: usize,
        text: String,
        #[source]
        source: Box<WaveError>,
    },

    /// I/O error while reading the source or writing the result.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl WaveError {
    /// Attach a 1-based line number and the source text to this error.
    pub fn at_line(self, line: usize, text: &str) -> Self {
        WaveError::AtLine {
            line,
            text: text.to_string(),
            source: Box::new(self),
        }
    }

    /// Line number of the failing input line, if known.
    pub fn line(&self) -> Option<usize> {
        match self {
            WaveError::AtLine { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// Errors in the parameter set.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A required parameter is missing.
    #[error("missing required parameter: {0}")]
    Missing(String),

    /// A parameter value is unusable.
    #[error("invalid value for '{name}': {reason}")]
    InvalidValue { name: String, reason: String },

    /// The activation band is empty or inverted.
    #[error("wave_in ({wave_in}) must be below wave_out ({wave_out})")]
    BandOrder { wave_in: f64, wave_out: f64 },

    /// The user surface expression was rejected.
    #[error("invalid wave_function expression: {0}")]
    Expression(String),
}

/// Errors evaluating the displacement surface.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArithmeticError {
    /// The surface divides by zero at this point.
    #[error("{surface} surface is singular at x={x}, y={y}, z={z}")]
    Singular {
        surface: &'static str,
        x: f64,
        y: f64,
        z: f64,
    },

    /// A move would be cut into an unreasonable number of pieces.
    #[error("move of length {length} can't be cut into pieces of at most {max_segment_length}")]
    TooManySegments {
        length: f64,
        max_segment_length: f64,
    },

    #[error("nominal layer height must be non-zero for extrusion compensation")]
    ZeroLayerHeight,

    /// The surface produced NaN or infinity.
    #[error("{surface} surface produced {value} at x={x}, y={y}, z={z}")]
    NonFinite {
        surface: &'static str,
        value: f64,
        x: f64,
        y: f64,
        z: f64,
    },
}

/// Result type for transform operations.
pub type Result<T> = std::result::Result<T, WaveError>;
