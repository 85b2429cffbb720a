pub mod classify;
pub mod error;
pub mod expr;
pub mod geometry;
pub mod params;
pub mod pipeline;
pub mod segment;
pub mod state;
pub mod surface;

pub use error::{ArithmeticError, ConfigError, Result, WaveError};
pub use params::{ParamValue, ParameterStore, WaveConfig};
pub use pipeline::{read_parameters, transform, write_output, Transform};
pub use surface::{RampBlend, Surface, WaveFunction};

pub fn gcode_comment(s: &str) -> String {
    format!("; {s}")
}

/// Append a gcode parameter value to `line`, if `ov` is `Some`.
pub fn g_val(line: &mut String, name: &str, ov: Option<f64>, digits: usize) {
    if let Some(v) = ov {
        line.push(' ');
        line.push_str(name);
        line.push_str(&format_number(v, digits));
    }
}

/// Round `v` half away from zero to `digits` decimals.
/// To make the gcode human-friendly, trailing zeros (and a trailing point) are dropped, so
/// `5.0` prints as `5` and `0.25000` as `0.25`.
pub fn format_number(v: f64, digits: usize) -> String {
    let factor = 10f64.powi(digits as i32);
    let rounded = (v * factor).round() / factor;
    let mut s = format!("{rounded:.digits$}");
    if s.contains('.') {
        let trimmed = s.trim_end_matches('0').trim_end_matches('.').len();
        s.truncate(trimmed);
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}
