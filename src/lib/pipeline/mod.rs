use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, trace, warn};

use crate::classify::{classify, HomeCommand, Line, MoveCommand, ResetCommand};
use crate::error::Result;
use crate::params::{ParameterStore, WaveConfig};
use crate::segment::MoveSegmenter;
use crate::state::{ExtrusionMode, MachineState, MoveKind};

pub const START_MARKER: &str = "; start of print";
pub const END_MARKER: &str = "; end of print";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Start,
    Print,
    End,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub lines_in: usize,
    pub lines_out: usize,
    pub displaced_moves: usize,
    pub segments: usize,
}

/// Result of a successful transform.
#[derive(Debug, Clone)]
pub struct Transform {
    pub lines: Vec<String>,
    pub stats: Stats,
    /// Machine state after the last line
    pub state: MachineState,
}

/// First pass: collect every directive in `lines` into `store`. Returns how many were found.
pub fn read_parameters<S: AsRef<str>>(lines: &[S], store: &mut ParameterStore) -> usize {
    let mut found = 0;
    for line in lines {
        if store.ingest_line(line.as_ref()).is_some() {
            found += 1;
        }
    }
    found
}

/// Second pass: rewrite `lines` under `config`.
/// Any error aborts the whole transform and names the line it happened on.
pub fn transform<S: AsRef<str>>(lines: &[S], config: &WaveConfig) -> Result<Transform> {
    let has_start = lines
        .iter()
        .any(|l| l.as_ref().trim_start().starts_with(START_MARKER));
    let mut pipeline = Pipeline {
        segmenter: MoveSegmenter::new(config),
        state: MachineState::new(),
        region: if has_start { Region::Start } else { Region::Print },
        out: Vec::with_capacity(lines.len()),
        stats: Stats::default(),
    };

    for (i, line) in lines.iter().enumerate() {
        let line = line.as_ref();
        pipeline
            .process_line(line)
            .map_err(|e| e.at_line(i + 1, line))?;
    }

    pipeline.stats.lines_in = lines.len();
    pipeline.stats.lines_out = pipeline.out.len();
    info!(
        lines_in = pipeline.stats.lines_in,
        lines_out = pipeline.stats.lines_out,
        displaced_moves = pipeline.stats.displaced_moves,
        segments = pipeline.stats.segments,
        "transform complete"
    );
    Ok(Transform {
        lines: pipeline.out,
        stats: pipeline.stats,
        state: pipeline.state,
    })
}

/// Write `lines` to `path`, one per line.
/// The data goes to a temporary file next to `path` that is renamed over it only once fully
/// written, so a failed write never leaves a partial toolpath behind.
pub fn write_output(path: &Path, lines: &[String]) -> io::Result<()> {
    let mut tmp: OsString = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let written = (|| {
        let mut file = BufWriter::new(File::create(&tmp)?);
        for line in lines {
            writeln!(file, "{line}")?;
        }
        file.flush()
    })();

    match written {
        Ok(()) => fs::rename(&tmp, path),
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

struct Pipeline<'a> {
    segmenter: MoveSegmenter<'a>,
    state: MachineState,
    region: Region,
    out: Vec<String>,
    stats: Stats,
}

impl Pipeline<'_> {
    fn emit(&mut self, line: &str) {
        self.out.push(line.trim_end().to_string());
    }

    fn process_line(&mut self, line: &str) -> Result<()> {
        let trimmed = line.trim_start();
        if trimmed.starts_with(START_MARKER) {
            self.region = Region::Print;
        } else if trimmed.starts_with(END_MARKER) {
            self.region = Region::End;
        }

        let kind = classify(line)?;
        match self.region {
            Region::Start => self.process_start_gcode(line, &kind),
            Region::End => self.process_end_gcode(line, &kind),
            Region::Print => self.filter_print_gcode(line, kind)?,
        }
        Ok(())
    }

    /// Start code is copied through, only the state follows it.
    fn process_start_gcode(&mut self, line: &str, kind: &Line) {
        self.track(kind);
        self.emit(line);
    }

    fn process_end_gcode(&mut self, line: &str, kind: &Line) {
        self.track(kind);
        self.emit(line);
    }

    fn track(&mut self, kind: &Line) {
        match kind {
            Line::Move(cmd) => {
                let mv = self.state.resolve(cmd);
                self.state.apply(&mv);
            }
            Line::Arc(cmd) => {
                let mv = self.state.resolve(cmd);
                self.state.apply(&mv);
            }
            Line::Home(cmd) => self.state.home(cmd),
            Line::Reset(cmd) => self.state.reset(cmd),
            Line::AbsoluteExtrusion => self.state.set_extrusion_mode(ExtrusionMode::Absolute),
            Line::RelativeExtrusion => self.state.set_extrusion_mode(ExtrusionMode::Relative),
            _ => {}
        }
    }

    fn filter_print_gcode(&mut self, line: &str, kind: Line) -> Result<()> {
        match kind {
            Line::Comment(comment) => self.process_comment(line, &comment),
            Line::ToolChange(tool) => self.process_tool_change(line, tool),
            Line::Move(cmd) => match self.state.kind_of(&cmd) {
                MoveKind::Printing => self.process_printing_move(line, &cmd)?,
                MoveKind::Travel => self.process_travel_move(line, &cmd)?,
                MoveKind::LayerChange => self.process_layer_change(line, &cmd)?,
                MoveKind::Retraction => self.process_retraction_move(line, &cmd),
                MoveKind::FeedOnly => self.process_feed_change(line, &cmd),
            },
            Line::Arc(cmd) => self.process_arc(line, &cmd),
            Line::Home(cmd) => self.process_home(line, &cmd),
            Line::Reset(cmd) => self.process_touch_off(line, &cmd),
            Line::AbsoluteExtrusion => self.process_absolute_extrusion(line),
            Line::RelativeExtrusion => self.process_relative_extrusion(line),
            Line::Blank | Line::Other => self.process_other(line),
        }
        Ok(())
    }

    fn process_comment(&mut self, line: &str, comment: &str) {
        trace!(comment, "comment");
        self.emit(line);
    }

    fn process_tool_change(&mut self, line: &str, tool: u32) {
        trace!(tool, "tool change");
        self.emit(line);
    }

    fn process_printing_move(&mut self, line: &str, cmd: &MoveCommand) -> Result<()> {
        self.displace_move(line, cmd)
    }

    fn process_travel_move(&mut self, line: &str, cmd: &MoveCommand) -> Result<()> {
        self.displace_move(line, cmd)
    }

    fn process_layer_change(&mut self, line: &str, cmd: &MoveCommand) -> Result<()> {
        trace!(z = cmd.z, "layer change");
        self.displace_move(line, cmd)
    }

    fn process_retraction_move(&mut self, line: &str, cmd: &MoveCommand) {
        trace!(e = cmd.e, f = cmd.f, "retraction");
        self.pass_move(line, cmd);
    }

    fn process_feed_change(&mut self, line: &str, cmd: &MoveCommand) {
        self.pass_move(line, cmd);
    }

    /// Arcs aren't displaced. Only their end point is tracked.
    fn process_arc(&mut self, line: &str, cmd: &MoveCommand) {
        let mv = self.state.resolve(cmd);
        let config = self.segmenter.config();
        if config.in_band(mv.start.z) || config.in_band(mv.end.z) {
            warn!(line = line.trim(), "arc inside the wave band is not displaced");
        }
        self.state.apply(&mv);
        self.emit(line);
    }

    fn process_home(&mut self, line: &str, cmd: &HomeCommand) {
        trace!(?cmd, "home");
        self.state.home(cmd);
        self.emit(line);
    }

    fn process_absolute_extrusion(&mut self, line: &str) {
        self.state.set_extrusion_mode(ExtrusionMode::Absolute);
        self.emit(line);
    }

    fn process_relative_extrusion(&mut self, line: &str) {
        self.state.set_extrusion_mode(ExtrusionMode::Relative);
        self.emit(line);
    }

    fn process_touch_off(&mut self, line: &str, cmd: &ResetCommand) {
        trace!(?cmd, "coordinate reset");
        self.state.reset(cmd);
        self.emit(line);
    }

    fn process_other(&mut self, line: &str) {
        self.emit(line);
    }

    /// Copy a move through unchanged, following it in the state.
    fn pass_move(&mut self, line: &str, cmd: &MoveCommand) {
        let mv = self.state.resolve(cmd);
        self.state.apply(&mv);
        self.emit(line);
    }

    fn displace_move(&mut self, line: &str, cmd: &MoveCommand) -> Result<()> {
        if cmd.opaque {
            warn!(line = line.trim(), "move has words other than X Y Z E F, not displacing");
            self.pass_move(line, cmd);
            return Ok(());
        }
        match self.segmenter.displace(line, cmd, &self.state)? {
            Some(replacement) => {
                self.stats.displaced_moves += 1;
                // Header and footer comments aren't segments.
                self.stats.segments += replacement
                    .iter()
                    .filter(|l| l.starts_with('G') && !l.starts_with("G92"))
                    .count();
                self.out.extend(replacement);
            }
            None => self.emit(line),
        }
        let mv = self.state.resolve(cmd);
        self.state.apply(&mv);
        Ok(())
    }
}
