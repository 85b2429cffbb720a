use nalgebra::Point3;
use tracing::debug;

use crate::classify::MoveCommand;
use crate::error::ArithmeticError;
use crate::params::WaveConfig;
use crate::state::{ExtrusionMode, MachineState, ResolvedMove};
use crate::surface::Surface;
use crate::{format_number, g_val, gcode_comment};

/// One displaced sub-move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    /// Position within the parent move, from 0
    pub index: usize,
    /// Un-displaced start and end on the parent move's line
    pub start: Point3<f64>,
    pub end: Point3<f64>,
    /// Displaced Z of `end`
    pub z: f64,
    /// Even share of the parent move's extrusion
    pub raw_e: f64,
    /// `raw_e` after extrusion compensation
    pub e: f64,
    pub feed: f64,
}

pub struct MoveSegmenter<'a> {
    config: &'a WaveConfig,
    surface: Surface<'a>,
}

impl<'a> MoveSegmenter<'a> {
    pub fn new(config: &'a WaveConfig) -> Self {
        MoveSegmenter {
            config,
            surface: Surface::new(config),
        }
    }

    pub fn config(&self) -> &'a WaveConfig {
        self.config
    }

    pub fn surface(&self) -> &Surface<'a> {
        &self.surface
    }

    /// Cut `mv` into displaced segments. Always returns at least one segment.
    pub fn segment(&self, mv: &ResolvedMove) -> Result<Vec<Segment>, ArithmeticError> {
        let line = mv.line();
        let n = line.pieces_for(self.config.max_segment_length)?;
        let raw_e = if mv.extrudes {
            mv.delta_e() / n as f64
        } else {
            0.0
        };

        line.subdivide(n)
            .into_iter()
            .enumerate()
            .map(|(index, piece)| {
                let dz = self.surface.displacement(&piece.end)?;
                let e = if mv.extrudes {
                    raw_e
                        * self
                            .surface
                            .extrusion_multiplier(&piece.end, self.config.layer_height)?
                } else {
                    0.0
                };
                Ok(Segment {
                    index,
                    start: piece.start,
                    end: piece.end,
                    z: piece.end.z + dz,
                    raw_e,
                    e,
                    feed: mv.feed,
                })
            })
            .collect()
    }

    /// Render `segments` as G-code lines, bracketed by comments naming the source line.
    ///
    /// In absolute extrusion mode E values accumulate from the move's start. If compensation
    /// moved the final E away from the source target, a `G92 E` puts the extruder back on the
    /// source's coordinates so later moves stay correct.
    pub fn render(
        &self,
        source: &str,
        rapid: bool,
        mv: &ResolvedMove,
        segments: &[Segment],
        mode: ExtrusionMode,
    ) -> Vec<String> {
        let digits = self.config.digits;
        let n = segments.len();
        let mut lines = Vec::with_capacity(n + 3);
        lines.push(gcode_comment(&format!(
            "displaced move start ({n} segment{}): {}",
            if n == 1 { "" } else { "s" },
            source.trim()
        )));

        let code = if rapid { "G0" } else { "G1" };
        let mut e_pos = mv.start_e;
        for seg in segments {
            let mut line = code.to_string();
            g_val(&mut line, "X", Some(seg.end.x), digits);
            g_val(&mut line, "Y", Some(seg.end.y), digits);
            g_val(&mut line, "Z", Some(seg.z), digits);
            if mv.extrudes {
                e_pos += seg.e;
                let e = match mode {
                    ExtrusionMode::Absolute => e_pos,
                    ExtrusionMode::Relative => seg.e,
                };
                g_val(&mut line, "E", Some(e), digits);
            }
            if seg.feed > 0.0 {
                g_val(&mut line, "F", Some(seg.feed), digits);
            }
            line.push(' ');
            line.push_str(&gcode_comment(&format!("segment {}/{n}", seg.index + 1)));
            lines.push(line);
        }

        if mv.extrudes
            && mode == ExtrusionMode::Absolute
            && format_number(e_pos, digits) != format_number(mv.end_e, digits)
        {
            let mut line = "G92".to_string();
            g_val(&mut line, "E", Some(mv.end_e), digits);
            lines.push(line);
        }
        lines.push(gcode_comment("displaced move end"));
        lines
    }

    /// Rewrite the move on `source`, starting from `state`.
    /// `None` means the move ends outside the band and the line stays as it is.
    pub fn displace(
        &self,
        source: &str,
        cmd: &MoveCommand,
        state: &MachineState,
    ) -> Result<Option<Vec<String>>, ArithmeticError> {
        let mv = state.resolve(cmd);
        if !self.config.in_band(mv.end.z) {
            return Ok(None);
        }
        let segments = self.segment(&mv)?;
        debug!(
            source = source.trim(),
            segments = segments.len(),
            "displaced move"
        );
        Ok(Some(self.render(
            source,
            cmd.rapid,
            &mv,
            &segments,
            state.extrusion,
        )))
    }
}
