use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use nalgebra::Point2;
use regex::Regex;
use tracing::{trace, warn};

use crate::error::ConfigError;
use crate::surface::{RampBlend, WaveFunction};

pub const WAVE_AMPLITUDE: &str = "wave_amplitude";
pub const WAVE_LENGTH: &str = "wave_length";
pub const WAVE_LENGTH_2: &str = "wave_length_2";
pub const WAVE_IN: &str = "wave_in";
pub const WAVE_OUT: &str = "wave_out";
pub const WAVE_RAMP: &str = "wave_ramp";
pub const WAVE_DIGITS: &str = "wave_digits";
pub const BED_CENTER_X: &str = "bed_center_x";
pub const BED_CENTER_Y: &str = "bed_center_y";
pub const WAVE_FUNCTION: &str = "wave_function";
pub const WAVE_MAX_SEGMENT_LENGTH: &str = "wave_max_segment_length";
pub const LAYER_HEIGHT: &str = "layer_height";

/// Largest supported `wave_digits`.
const MAX_DIGITS: f64 = 9.0;
/// Shortest allowed `wave_max_segment_length`, in mm.
pub const MIN_SEGMENT_LENGTH: f64 = 0.001;

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Number(f64),
    Text(String),
}

impl ParamValue {
    /// Numbers become `Number`, everything else is kept as text.
    pub fn parse(raw: &str) -> ParamValue {
        let raw = raw.trim();
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => ParamValue::Number(v),
            _ => ParamValue::Text(raw.to_string()),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Number(v) => write!(f, "{v}"),
            ParamValue::Text(s) => write!(f, "{s}"),
        }
    }
}

fn directive_re() -> &'static Regex {
    static DIRECTIVE_REGEX: OnceLock<Regex> = OnceLock::new();
    DIRECTIVE_REGEX.get_or_init(|| {
        Regex::new(r"^\s*;\s*([A-Za-z_][\w-]*)\s*=\s*(.*?)\s*$").expect("invalid regex pattern")
    })
}

/// Mapping of parameter names to values.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterStore {
    values: BTreeMap<String, ParamValue>,
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterStore {
    /// A store seeded with the built-in defaults.
    pub fn new() -> Self {
        let mut store = Self::empty();
        for (key, value) in [
            (WAVE_AMPLITUDE, 2.0),
            (WAVE_LENGTH, 20.0),
            (WAVE_LENGTH_2, 200.0),
            (WAVE_IN, 0.4),
            (WAVE_OUT, 30.0),
            (WAVE_RAMP, 10.0),
            (WAVE_DIGITS, 4.0),
            (BED_CENTER_X, 0.0),
            (BED_CENTER_Y, 0.0),
            (WAVE_MAX_SEGMENT_LENGTH, 1.0),
            (LAYER_HEIGHT, 0.2),
        ] {
            store.set(key, ParamValue::Number(value));
        }
        store.set(WAVE_FUNCTION, ParamValue::Text("wave".into()));
        store
    }

    /// A store with no parameters at all.
    pub fn empty() -> Self {
        ParameterStore {
            values: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: ParamValue) {
        self.values.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Read a `; key = value` directive from a G-code line, if it is one.
    /// Returns the key that was set. A later directive for the same key replaces an earlier one.
    pub fn ingest_line(&mut self, line: &str) -> Option<String> {
        let caps = directive_re().captures(line)?;
        let key = caps.get(1)?.as_str();
        let raw = caps.get(2)?.as_str();
        if raw.is_empty() {
            return None;
        }
        let value = ParamValue::parse(raw);
        trace!(key, %value, "directive");
        self.set(key, value);
        Some(key.to_string())
    }

    /// Apply a command line `key=value` override.
    pub fn apply_override(&mut self, assignment: &str) -> Result<(), ConfigError> {
        let (key, raw) = assignment.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
            name: assignment.to_string(),
            reason: "expected key=value".into(),
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: assignment.to_string(),
                reason: "empty parameter name".into(),
            });
        }
        self.set(key, ParamValue::parse(raw));
        Ok(())
    }

    /// Look up a numeric parameter.
    pub fn number(&self, key: &str) -> Result<f64, ConfigError> {
        match self.get(key) {
            Some(ParamValue::Number(v)) => Ok(*v),
            Some(ParamValue::Text(s)) => Err(ConfigError::InvalidValue {
                name: key.to_string(),
                reason: format!("expected a number, found \"{s}\""),
            }),
            None => Err(ConfigError::Missing(key.to_string())),
        }
    }

    fn positive(&self, key: &str) -> Result<f64, ConfigError> {
        let v = self.number(key)?;
        if v <= 0.0 {
            return Err(ConfigError::InvalidValue {
                name: key.to_string(),
                reason: format!("must be greater than zero, found {v}"),
            });
        }
        Ok(v)
    }

    /// Check every invariant and build the immutable configuration used by the transform.
    pub fn resolve(&self) -> Result<WaveConfig, ConfigError> {
        let wave_in = self.number(WAVE_IN)?;
        let wave_out = self.number(WAVE_OUT)?;
        if wave_in >= wave_out {
            return Err(ConfigError::BandOrder { wave_in, wave_out });
        }

        let mut ramp = self.number(WAVE_RAMP)?;
        if ramp < 0.0 {
            return Err(ConfigError::InvalidValue {
                name: WAVE_RAMP.into(),
                reason: format!("must not be negative, found {ramp}"),
            });
        }
        let half_band = (wave_out - wave_in) / 2.0;
        if ramp > half_band {
            warn!(
                ramp,
                clamped = half_band,
                "wave_ramp is longer than half the band, clamping"
            );
            ramp = half_band;
        }

        let digits = self.number(WAVE_DIGITS)?;
        if digits.fract() != 0.0 || !(0.0..=MAX_DIGITS).contains(&digits) {
            return Err(ConfigError::InvalidValue {
                name: WAVE_DIGITS.into(),
                reason: format!("must be a whole number from 0 to {MAX_DIGITS}, found {digits}"),
            });
        }

        let max_segment_length = self.positive(WAVE_MAX_SEGMENT_LENGTH)?;
        if max_segment_length < MIN_SEGMENT_LENGTH {
            return Err(ConfigError::InvalidValue {
                name: WAVE_MAX_SEGMENT_LENGTH.into(),
                reason: format!("must be at least {MIN_SEGMENT_LENGTH}, found {max_segment_length}"),
            });
        }

        let function = match self.get(WAVE_FUNCTION) {
            Some(value) => WaveFunction::parse(&value.to_string())?,
            None => return Err(ConfigError::Missing(WAVE_FUNCTION.into())),
        };

        Ok(WaveConfig {
            amplitude: self.number(WAVE_AMPLITUDE)?,
            wave_length: self.positive(WAVE_LENGTH)?,
            wave_length_2: self.positive(WAVE_LENGTH_2)?,
            ramp: RampBlend::new(wave_in, wave_out, ramp),
            digits: digits as usize,
            bed_center: Point2::new(self.number(BED_CENTER_X)?, self.number(BED_CENTER_Y)?),
            function,
            max_segment_length,
            layer_height: self.positive(LAYER_HEIGHT)?,
        })
    }
}

/// Fully validated transform settings. Built once before the transform pass and never changed.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveConfig {
    pub amplitude: f64,
    pub wave_length: f64,
    pub wave_length_2: f64,
    /// Activation band and its ramps
    pub ramp: RampBlend,
    pub digits: usize,
    pub bed_center: Point2<f64>,
    pub function: WaveFunction,
    pub max_segment_length: f64,
    /// Nominal layer height, used for extrusion compensation
    pub layer_height: f64,
}

impl WaveConfig {
    pub fn wave_in(&self) -> f64 {
        self.ramp.wave_in
    }

    pub fn wave_out(&self) -> f64 {
        self.ramp.wave_out
    }

    /// Is `z` inside the activation band (inclusive)?
    pub fn in_band(&self, z: f64) -> bool {
        z >= self.wave_in() && z <= self.wave_out()
    }
}

impl fmt::Display for WaveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "function={} amplitude={} wave_length={} wave_length_2={} band={}..{} ramp={} \
             bed_center=({}, {}) max_segment_length={} layer_height={} digits={}",
            self.function,
            self.amplitude,
            self.wave_length,
            self.wave_length_2,
            self.wave_in(),
            self.wave_out(),
            self.ramp.ramp,
            self.bed_center.x,
            self.bed_center.y,
            self.max_segment_length,
            self.layer_height,
            self.digits
        )
    }
}
