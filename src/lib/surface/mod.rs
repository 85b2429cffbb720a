use std::f64::consts::PI;
use std::fmt;

use nalgebra::Point3;

use crate::error::{ArithmeticError, ConfigError};
use crate::expr::{Context, Expr};
use crate::params::WaveConfig;

/// Below this magnitude a sine in the denominator of the `wave` surface counts as zero.
const SINGULAR_EPSILON: f64 = 1e-9;

/// Blend factor for the activation band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampBlend {
    pub wave_in: f64,
    pub wave_out: f64,
    pub ramp: f64,
}

impl RampBlend {
    pub fn new(wave_in: f64, wave_out: f64, ramp: f64) -> Self {
        RampBlend {
            wave_in,
            wave_out,
            ramp,
        }
    }

    /// 0 at and below `wave_in`, rising linearly to 1 at `wave_in + ramp`.
    pub fn rising(&self, z: f64) -> f64 {
        if self.ramp <= 0.0 {
            return if z >= self.wave_in { 1.0 } else { 0.0 };
        }
        ((z - self.wave_in) / self.ramp).clamp(0.0, 1.0)
    }

    /// 1 up to `wave_out - ramp`, falling linearly to 0 at `wave_out`.
    pub fn falling(&self, z: f64) -> f64 {
        if self.ramp <= 0.0 {
            return if z <= self.wave_out { 1.0 } else { 0.0 };
        }
        ((self.wave_out - z) / self.ramp).clamp(0.0, 1.0)
    }

    /// Product of both ramps, always in `[0, 1]`.
    ///
    /// When the ramps overlap (`ramp` more than half the band) the product never reaches 1, the
    /// peak is simply lower. [`crate::params::ParameterStore::resolve`] clamps the ramp so this
    /// only happens for directly constructed blends.
    pub fn blend(&self, z: f64) -> f64 {
        self.rising(z) * self.falling(z)
    }
}

/// Which surface the displacement follows.
#[derive(Debug, Clone, PartialEq)]
pub enum WaveFunction {
    /// Reciprocal-sine egg crate in X and Y
    Wave,
    /// Sine-squared profile across X, modulated along Y
    Wing,
    /// User supplied expression
    Expression(Expr),
}

impl WaveFunction {
    /// `wave`, `wing`, or anything else as an expression.
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.trim() {
            "wave" => Ok(WaveFunction::Wave),
            "wing" => Ok(WaveFunction::Wing),
            other => Ok(WaveFunction::Expression(Expr::compile(other)?)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WaveFunction::Wave => "wave",
            WaveFunction::Wing => "wing",
            WaveFunction::Expression(_) => "expression",
        }
    }
}

impl fmt::Display for WaveFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaveFunction::Expression(expr) => write!(f, "\"{expr}\""),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Evaluates displacement and extrusion compensation for a [`WaveConfig`].
#[derive(Debug, Clone, Copy)]
pub struct Surface<'a> {
    config: &'a WaveConfig,
}

impl<'a> Surface<'a> {
    pub fn new(config: &'a WaveConfig) -> Self {
        Surface { config }
    }

    pub fn blend(&self, z: f64) -> f64 {
        self.config.ramp.blend(z)
    }

    /// Z offset to add at the nominal point `p`.
    /// Exactly zero wherever the blend is zero, without evaluating the surface.
    pub fn displacement(&self, p: &Point3<f64>) -> Result<f64, ArithmeticError> {
        let blend = self.blend(p.z);
        if blend == 0.0 {
            return Ok(0.0);
        }
        let raw = self.raw_displacement(p)?;
        let dz = blend * raw;
        if !dz.is_finite() {
            return Err(ArithmeticError::NonFinite {
                surface: self.config.function.name(),
                value: dz,
                x: p.x,
                y: p.y,
                z: p.z,
            });
        }
        Ok(dz)
    }

    /// Unblended surface height at `p`.
    fn raw_displacement(&self, p: &Point3<f64>) -> Result<f64, ArithmeticError> {
        let c = &self.config;
        let a = c.amplitude;
        let (cx, cy) = (c.bed_center.x, c.bed_center.y);
        match &c.function {
            WaveFunction::Wave => {
                let sx = (2.0 * PI * (p.x - cx) / c.wave_length).sin();
                let sy = (2.0 * PI * (p.y - cy) / c.wave_length).sin();
                if sx.abs() < SINGULAR_EPSILON || sy.abs() < SINGULAR_EPSILON {
                    return Err(ArithmeticError::Singular {
                        surface: "wave",
                        x: p.x,
                        y: p.y,
                        z: p.z,
                    });
                }
                Ok(-a / 2.0 + a / (4.0 * sx) + a / (4.0 * sy))
            }
            WaveFunction::Wing => {
                if a == 0.0 {
                    return Ok(0.0);
                }
                let root_pi = PI.sqrt();
                let profile = (root_pi * (p.x - cx) / a - root_pi / 2.0).sin().powi(2);
                let y_shift = p.y - cy - c.wave_length_2 / 4.0;
                let modulation = 1.0 + 0.5 * (2.0 * PI * y_shift / c.wave_length_2).cos();
                Ok(-a / 2.0 + a * profile * modulation)
            }
            WaveFunction::Expression(expr) => Ok(expr.eval(&Context {
                x: p.x,
                y: p.y,
                z: p.z,
                amplitude: a,
                wave_length: c.wave_length,
                wave_length_2: c.wave_length_2,
                bed_center_x: cx,
                bed_center_y: cy,
                layer_height: c.layer_height,
            })),
        }
    }

    /// Extrusion scale factor at `p`.
    ///
    /// The local layer is thicker or thinner than `layer_height` by however much the displacement
    /// changed since the layer below, so extrusion scales by `1 + (dz_here - dz_below) / h`.
    /// Never negative.
    pub fn extrusion_multiplier(
        &self,
        p: &Point3<f64>,
        layer_height: f64,
    ) -> Result<f64, ArithmeticError> {
        if layer_height == 0.0 || !layer_height.is_finite() {
            return Err(ArithmeticError::ZeroLayerHeight);
        }
        let here = self.displacement(p)?;
        let below = self.displacement(&Point3::new(p.x, p.y, p.z - layer_height))?;
        Ok((1.0 + (here - below) / layer_height).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ParamValue, ParameterStore};
    use approx::assert_relative_eq;

    fn config_with(pairs: &[(&str, &str)]) -> WaveConfig {
        let mut store = ParameterStore::new();
        for (k, v) in pairs {
            store.set(k, ParamValue::parse(v));
        }
        store.resolve().unwrap()
    }

    #[test]
    fn test_blend_plateau() {
        let ramp = RampBlend::new(0.4, 30.0, 10.0);
        for z in [10.5, 12.0, 15.0, 19.5] {
            assert_eq!(ramp.blend(z), 1.0);
        }
    }

    #[test]
    fn test_blend_outside_band() {
        let ramp = RampBlend::new(0.4, 30.0, 10.0);
        for z in [-1.0, 0.0, 0.4, 30.0, 31.0, 1000.0] {
            assert_eq!(ramp.blend(z), 0.0);
        }
    }

    #[test]
    fn test_blend_ramps() {
        let ramp = RampBlend::new(0.4, 30.0, 10.0);
        assert_relative_eq!(ramp.blend(5.4), 0.5, epsilon = 1e-12);
        assert_relative_eq!(ramp.blend(25.0), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_blend_continuous() {
        let ramp = RampBlend::new(0.4, 30.0, 10.0);
        let step = 1e-7;
        for edge in [0.4, 10.4, 20.0, 30.0] {
            let jump = (ramp.blend(edge + step) - ramp.blend(edge - step)).abs();
            assert!(jump < 1e-6, "discontinuity at {edge}: {jump}");
        }
    }

    #[test]
    fn test_blend_zero_ramp_is_step() {
        let ramp = RampBlend::new(1.0, 2.0, 0.0);
        assert_eq!(ramp.blend(0.999), 0.0);
        assert_eq!(ramp.blend(1.0), 1.0);
        assert_eq!(ramp.blend(1.5), 1.0);
        assert_eq!(ramp.blend(2.0), 1.0);
        assert_eq!(ramp.blend(2.001), 0.0);
    }

    #[test]
    fn test_blend_overlapping_ramps_reduce_peak() {
        let ramp = RampBlend::new(0.0, 4.0, 4.0);
        assert_relative_eq!(ramp.blend(2.0), 0.25, epsilon = 1e-12);
        for i in 0..=40 {
            let b = ramp.blend(i as f64 * 0.1);
            assert!((0.0..=0.25 + 1e-12).contains(&b));
        }
    }

    #[test]
    fn test_displacement_zero_outside_band() {
        let config = ParameterStore::new().resolve().unwrap();
        let surface = Surface::new(&config);
        // Includes points where the wave surface is singular.
        for &(x, y) in &[(0.0, 0.0), (10.0, 10.0), (3.3, -7.1), (123.0, 45.6)] {
            for &z in &[0.0, 0.2, 0.4, 30.0, 45.0] {
                assert_eq!(surface.displacement(&Point3::new(x, y, z)).unwrap(), 0.0);
            }
        }
    }

    #[test]
    fn test_wave_value() {
        let config = config_with(&[("wave_ramp", "0")]);
        let surface = Surface::new(&config);
        // sin(pi/2) == 1 in both axes: -1 + 0.5 + 0.5
        let dz = surface.displacement(&Point3::new(5.0, 5.0, 10.0)).unwrap();
        assert_relative_eq!(dz, 0.0, epsilon = 1e-12);
        // sin(-pi/2) == -1 in X
        let dz = surface.displacement(&Point3::new(-5.0, 5.0, 10.0)).unwrap();
        assert_relative_eq!(dz, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_wave_singular() {
        let config = ParameterStore::new().resolve().unwrap();
        let surface = Surface::new(&config);
        let err = surface.displacement(&Point3::new(10.0, 5.0, 15.0)).unwrap_err();
        assert!(matches!(err, ArithmeticError::Singular { surface: "wave", .. }));
        let err = surface.displacement(&Point3::new(5.0, 0.0, 15.0)).unwrap_err();
        assert!(matches!(err, ArithmeticError::Singular { .. }));
    }

    #[test]
    fn test_wing_value() {
        let config = config_with(&[("wave_function", "wing"), ("wave_ramp", "0")]);
        let surface = Surface::new(&config);
        // x = A/2 puts the sine argument at zero; the profile term vanishes.
        let dz = surface.displacement(&Point3::new(1.0, 0.0, 10.0)).unwrap();
        assert_relative_eq!(dz, -1.0, epsilon = 1e-12);
        // At y = λy/4 the modulation peaks at 1.5.
        let x = 1.0 + PI.sqrt();
        let dz = surface.displacement(&Point3::new(x, 50.0, 10.0)).unwrap();
        assert_relative_eq!(dz, -1.0 + 2.0 * 1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_wing_blended() {
        let config = config_with(&[("wave_function", "wing")]);
        let surface = Surface::new(&config);
        let full = config_with(&[("wave_function", "wing"), ("wave_ramp", "0")]);
        let p = Point3::new(7.0, 13.0, 5.4);
        let half = surface.displacement(&p).unwrap();
        let whole = Surface::new(&full).displacement(&p).unwrap();
        assert_relative_eq!(half, 0.5 * whole, epsilon = 1e-12);
    }

    #[test]
    fn test_expression_surface() {
        let config = config_with(&[("wave_function", "amplitude * sin(x) / 2"), ("wave_ramp", "0")]);
        let surface = Surface::new(&config);
        let dz = surface
            .displacement(&Point3::new(PI / 2.0, 0.0, 5.0))
            .unwrap();
        assert_relative_eq!(dz, 1.0, epsilon = 1e-12);
        assert_eq!(surface.displacement(&Point3::new(PI / 2.0, 0.0, 0.1)).unwrap(), 0.0);
    }

    #[test]
    fn test_expression_non_finite() {
        let config = config_with(&[("wave_function", "1 / x")]);
        let surface = Surface::new(&config);
        let err = surface.displacement(&Point3::new(0.0, 0.0, 15.0)).unwrap_err();
        assert!(matches!(err, ArithmeticError::NonFinite { .. }));
    }

    #[test]
    fn test_multiplier_flat_surface() {
        let config = config_with(&[("wave_function", "0.5")]);
        let surface = Surface::new(&config);
        // Plateau: a constant offset doesn't change layer thickness.
        let m = surface.extrusion_multiplier(&Point3::new(1.0, 2.0, 15.0), 0.2).unwrap();
        assert_relative_eq!(m, 1.0, epsilon = 1e-12);
        // Outside the band nothing changes either.
        let m = surface.extrusion_multiplier(&Point3::new(1.0, 2.0, 0.2), 0.2).unwrap();
        assert_eq!(m, 1.0);
    }

    #[test]
    fn test_multiplier_on_ramp() {
        // Constant 1mm offset fading in over 10mm: 0.02mm of extra height per 0.2mm layer.
        let config = config_with(&[("wave_function", "1"), ("wave_in", "0"), ("wave_ramp", "10")]);
        let surface = Surface::new(&config);
        let m = surface.extrusion_multiplier(&Point3::new(0.0, 0.0, 5.0), 0.2).unwrap();
        assert_relative_eq!(m, 1.1, epsilon = 1e-9);
    }

    #[test]
    fn test_multiplier_never_negative() {
        let config = config_with(&[("wave_function", "-100"), ("wave_in", "0"), ("wave_ramp", "1")]);
        let surface = Surface::new(&config);
        let m = surface.extrusion_multiplier(&Point3::new(0.0, 0.0, 0.5), 0.2).unwrap();
        assert_eq!(m, 0.0);
    }

    #[test]
    fn test_multiplier_zero_layer_height() {
        let config = ParameterStore::new().resolve().unwrap();
        let surface = Surface::new(&config);
        assert_eq!(
            surface.extrusion_multiplier(&Point3::new(5.0, 5.0, 5.0), 0.0),
            Err(ArithmeticError::ZeroLayerHeight)
        );
    }
}
