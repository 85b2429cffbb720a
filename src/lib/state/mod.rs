use nalgebra::Point3;

use crate::classify::{HomeCommand, MoveCommand, ResetCommand};
use crate::geometry::LineSegment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtrusionMode {
    /// M82: E words are absolute positions
    #[default]
    Absolute,
    /// M83: E words are increments
    Relative,
}

/// What a move does, judged against the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    /// Moves in X, Y or Z while extruding
    Printing,
    /// Moves in X or Y without extruding
    Travel,
    /// Moves only in Z
    LayerChange,
    /// Extruder only
    Retraction,
    /// No axis or extruder motion, e.g. a bare feed rate change
    FeedOnly,
}

/// A move with every field filled in from the state it starts from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedMove {
    pub start: Point3<f64>,
    pub end: Point3<f64>,
    /// Logical absolute extruder position before and after
    pub start_e: f64,
    pub end_e: f64,
    /// Feed rate in force for the move; zero if none was ever set
    pub feed: f64,
    /// The source line has an E word that changes the extruder position
    pub extrudes: bool,
}

impl ResolvedMove {
    pub fn delta_e(&self) -> f64 {
        self.end_e - self.start_e
    }

    pub fn line(&self) -> LineSegment {
        LineSegment::new(self.start, self.end)
    }
}

/// Last known nominal position, extruder, feed and extrusion mode.
///
/// Positions are always un-displaced: what the source file asked for, not what was emitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachineState {
    pub position: Point3<f64>,
    pub previous: Point3<f64>,
    /// Logical absolute extruder position, in either mode
    pub e: f64,
    pub feed: f64,
    pub extrusion: ExtrusionMode,
}

impl Default for MachineState {
    fn default() -> Self {
        MachineState {
            position: Point3::origin(),
            previous: Point3::origin(),
            e: 0.0,
            feed: 0.0,
            extrusion: ExtrusionMode::Absolute,
        }
    }
}

impl MachineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill omitted fields of `cmd` from the current state. An omitted axis keeps its last value.
    pub fn resolve(&self, cmd: &MoveCommand) -> ResolvedMove {
        let end = Point3::new(
            cmd.x.unwrap_or(self.position.x),
            cmd.y.unwrap_or(self.position.y),
            cmd.z.unwrap_or(self.position.z),
        );
        let end_e = match (cmd.e, self.extrusion) {
            (Some(e), ExtrusionMode::Absolute) => e,
            (Some(e), ExtrusionMode::Relative) => self.e + e,
            (None, _) => self.e,
        };
        ResolvedMove {
            start: self.position,
            end,
            start_e: self.e,
            end_e,
            feed: cmd.f.unwrap_or(self.feed),
            extrudes: end_e != self.e,
        }
    }

    pub fn kind_of(&self, cmd: &MoveCommand) -> MoveKind {
        let extrudes = self.resolve(cmd).extrudes;
        match (extrudes, cmd.has_xy(), cmd.z.is_some()) {
            (true, false, false) => MoveKind::Retraction,
            (true, _, _) => MoveKind::Printing,
            (false, true, _) => MoveKind::Travel,
            (false, false, true) => MoveKind::LayerChange,
            (false, false, false) => MoveKind::FeedOnly,
        }
    }

    /// Move to the (un-displaced) end of `mv`.
    pub fn apply(&mut self, mv: &ResolvedMove) {
        self.previous = self.position;
        self.position = mv.end;
        self.e = mv.end_e;
        self.feed = mv.feed;
    }

    /// G92: redefine the current position. With no axes, every axis becomes zero.
    pub fn reset(&mut self, cmd: &ResetCommand) {
        if cmd.is_empty() {
            self.position = Point3::origin();
            self.e = 0.0;
            return;
        }
        if let Some(x) = cmd.x {
            self.position.x = x;
        }
        if let Some(y) = cmd.y {
            self.position.y = y;
        }
        if let Some(z) = cmd.z {
            self.position.z = z;
        }
        if let Some(e) = cmd.e {
            self.e = e;
        }
    }

    /// G28: homed axes are taken to be at zero.
    pub fn home(&mut self, cmd: &HomeCommand) {
        self.previous = self.position;
        if cmd.x {
            self.position.x = 0.0;
        }
        if cmd.y {
            self.position.y = 0.0;
        }
        if cmd.z {
            self.position.z = 0.0;
        }
    }

    pub fn set_extrusion_mode(&mut self, mode: ExtrusionMode) {
        self.extrusion = mode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(x: Option<f64>, y: Option<f64>, z: Option<f64>, e: Option<f64>, f: Option<f64>) -> MoveCommand {
        MoveCommand {
            x,
            y,
            z,
            e,
            f,
            ..Default::default()
        }
    }

    #[test]
    fn test_starts_at_zero() {
        let state = MachineState::new();
        assert_eq!(state.position, Point3::origin());
        assert_eq!(state.e, 0.0);
        assert_eq!(state.feed, 0.0);
        assert_eq!(state.extrusion, ExtrusionMode::Absolute);
    }

    #[test]
    fn test_omitted_axes_inherit() {
        let mut state = MachineState::new();
        let first = state.resolve(&mv(Some(10.0), Some(20.0), Some(0.3), None, Some(3000.0)));
        state.apply(&first);
        let second = state.resolve(&mv(Some(15.0), None, None, Some(0.5), None));
        assert_eq!(second.start, Point3::new(10.0, 20.0, 0.3));
        assert_eq!(second.end, Point3::new(15.0, 20.0, 0.3));
        assert_eq!(second.feed, 3000.0);
        assert_eq!(second.delta_e(), 0.5);
        assert!(second.extrudes);
    }

    #[test]
    fn test_relative_extrusion() {
        let mut state = MachineState::new();
        state.set_extrusion_mode(ExtrusionMode::Relative);
        let a = state.resolve(&mv(Some(1.0), None, None, Some(0.2), None));
        state.apply(&a);
        let b = state.resolve(&mv(Some(2.0), None, None, Some(0.3), None));
        assert_eq!(b.start_e, 0.2);
        assert!((b.end_e - 0.5).abs() < 1e-12);
        assert!((b.delta_e() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_kinds() {
        let mut state = MachineState::new();
        state.e = 3.0;
        assert_eq!(state.kind_of(&mv(Some(1.0), None, None, Some(3.5), None)), MoveKind::Printing);
        assert_eq!(state.kind_of(&mv(Some(1.0), None, None, Some(3.0), None)), MoveKind::Travel);
        assert_eq!(state.kind_of(&mv(Some(1.0), Some(2.0), None, None, None)), MoveKind::Travel);
        assert_eq!(state.kind_of(&mv(None, None, Some(0.4), None, None)), MoveKind::LayerChange);
        assert_eq!(state.kind_of(&mv(None, None, None, Some(2.2), Some(2400.0))), MoveKind::Retraction);
        assert_eq!(state.kind_of(&mv(None, None, None, None, Some(1800.0))), MoveKind::FeedOnly);
    }

    #[test]
    fn test_apply_tracks_previous() {
        let mut state = MachineState::new();
        let a = state.resolve(&mv(Some(5.0), Some(5.0), Some(1.0), None, Some(600.0)));
        state.apply(&a);
        let b = state.resolve(&mv(Some(6.0), None, None, None, None));
        state.apply(&b);
        assert_eq!(state.previous, Point3::new(5.0, 5.0, 1.0));
        assert_eq!(state.position, Point3::new(6.0, 5.0, 1.0));
        assert_eq!(state.feed, 600.0);
    }

    #[test]
    fn test_home() {
        let mut state = MachineState::new();
        state.position = Point3::new(1.0, 2.0, 3.0);
        state.e = 4.0;
        state.home(&HomeCommand {
            z: true,
            ..Default::default()
        });
        assert_eq!(state.position, Point3::new(1.0, 2.0, 0.0));
        assert_eq!(state.e, 4.0);
    }

    #[test]
    fn test_reset() {
        let mut state = MachineState::new();
        state.position = Point3::new(1.0, 2.0, 3.0);
        state.e = 42.0;
        state.reset(&ResetCommand {
            e: Some(0.0),
            ..Default::default()
        });
        assert_eq!(state.position, Point3::new(1.0, 2.0, 3.0));
        assert_eq!(state.e, 0.0);
        state.reset(&ResetCommand::default());
        assert_eq!(state.position, Point3::origin());
    }
}
