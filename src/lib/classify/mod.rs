use std::sync::OnceLock;

use regex::Regex;

use crate::error::WaveError;

/// A G0/G1 linear move. Omitted words are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoveCommand {
    /// G0 rather than G1
    pub rapid: bool,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub e: Option<f64>,
    pub f: Option<f64>,
    /// Carries words other than X, Y, Z, E and F, so it can't be rewritten faithfully.
    pub opaque: bool,
}

impl MoveCommand {
    pub fn has_xy(&self) -> bool {
        self.x.is_some() || self.y.is_some()
    }
}

/// A G92 coordinate reset. Omitted axes keep their position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResetCommand {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub e: Option<f64>,
}

impl ResetCommand {
    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.z.is_none() && self.e.is_none()
    }
}

/// G28. No axis words means every axis is homed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HomeCommand {
    pub x: bool,
    pub y: bool,
    pub z: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Blank,
    /// Text after the leading `;`
    Comment(String),
    ToolChange(u32),
    Move(MoveCommand),
    /// G2/G3, kept only for its end point
    Arc(MoveCommand),
    Home(HomeCommand),
    Reset(ResetCommand),
    /// M82
    AbsoluteExtrusion,
    /// M83
    RelativeExtrusion,
    Other,
}

fn comment_re() -> &'static Regex {
    static COMMENT_REGEX: OnceLock<Regex> = OnceLock::new();
    COMMENT_REGEX.get_or_init(|| Regex::new(r"^\s*;\s*(.*?)\s*$").expect("invalid regex pattern"))
}

fn tool_re() -> &'static Regex {
    static TOOL_REGEX: OnceLock<Regex> = OnceLock::new();
    TOOL_REGEX.get_or_init(|| Regex::new(r"^T(\d+)(?:\s|;|$)").expect("invalid regex pattern"))
}

fn move_re() -> &'static Regex {
    static MOVE_REGEX: OnceLock<Regex> = OnceLock::new();
    MOVE_REGEX.get_or_init(|| Regex::new(r"^G0?([01])(?:\s|;|$)").expect("invalid regex pattern"))
}

fn arc_re() -> &'static Regex {
    static ARC_REGEX: OnceLock<Regex> = OnceLock::new();
    ARC_REGEX.get_or_init(|| Regex::new(r"^G0?[23](?:\s|;|$)").expect("invalid regex pattern"))
}

fn home_re() -> &'static Regex {
    static HOME_REGEX: OnceLock<Regex> = OnceLock::new();
    HOME_REGEX.get_or_init(|| Regex::new(r"^G28(?:\s|;|$)").expect("invalid regex pattern"))
}

fn reset_re() -> &'static Regex {
    static RESET_REGEX: OnceLock<Regex> = OnceLock::new();
    RESET_REGEX.get_or_init(|| Regex::new(r"^G92(?:\s|;|$)").expect("invalid regex pattern"))
}

fn m82_re() -> &'static Regex {
    static M82_REGEX: OnceLock<Regex> = OnceLock::new();
    M82_REGEX.get_or_init(|| Regex::new(r"^M82(?:\s|;|$)").expect("invalid regex pattern"))
}

fn m83_re() -> &'static Regex {
    static M83_REGEX: OnceLock<Regex> = OnceLock::new();
    M83_REGEX.get_or_init(|| Regex::new(r"^M83(?:\s|;|$)").expect("invalid regex pattern"))
}

/// The words of a command, without the command itself or any trailing comment.
fn words(line: &str) -> impl Iterator<Item = &str> {
    let code = line.split(';').next().unwrap_or("");
    code.split_whitespace().skip(1)
}

fn word_value(word: &str, line: &str) -> Result<f64, WaveError> {
    word[1..]
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| WaveError::Parse(format!("bad value in '{word}' of \"{}\"", line.trim())))
}

fn parse_move(line: &str, rapid: bool) -> Result<MoveCommand, WaveError> {
    let mut cmd = MoveCommand {
        rapid,
        ..Default::default()
    };
    for word in words(line) {
        let slot = match word.as_bytes()[0].to_ascii_uppercase() {
            b'X' => &mut cmd.x,
            b'Y' => &mut cmd.y,
            b'Z' => &mut cmd.z,
            b'E' => &mut cmd.e,
            b'F' => &mut cmd.f,
            _ => {
                cmd.opaque = true;
                continue;
            }
        };
        *slot = Some(word_value(word, line)?);
    }
    Ok(cmd)
}

fn parse_home(line: &str) -> HomeCommand {
    let mut cmd = HomeCommand::default();
    for word in words(line) {
        match word.as_bytes()[0].to_ascii_uppercase() {
            b'X' => cmd.x = true,
            b'Y' => cmd.y = true,
            b'Z' => cmd.z = true,
            _ => {}
        }
    }
    if !(cmd.x || cmd.y || cmd.z) {
        cmd = HomeCommand {
            x: true,
            y: true,
            z: true,
        };
    }
    cmd
}

fn parse_reset(line: &str) -> Result<ResetCommand, WaveError> {
    let mut cmd = ResetCommand::default();
    for word in words(line) {
        let slot = match word.as_bytes()[0].to_ascii_uppercase() {
            b'X' => &mut cmd.x,
            b'Y' => &mut cmd.y,
            b'Z' => &mut cmd.z,
            b'E' => &mut cmd.e,
            _ => continue,
        };
        *slot = Some(word_value(word, line)?);
    }
    Ok(cmd)
}

/// Sort `line` into its [`Line`] kind. Fails only when a move or reset has an axis word whose
/// value can't be read; unfamiliar lines are [`Line::Other`].
pub fn classify(line: &str) -> Result<Line, WaveError> {
    if line.trim().is_empty() {
        return Ok(Line::Blank);
    }
    if let Some(caps) = comment_re().captures(line) {
        return Ok(Line::Comment(caps[1].to_string()));
    }
    let code = line.trim_start();
    if let Some(caps) = tool_re().captures(code) {
        return Ok(match caps[1].parse() {
            Ok(tool) => Line::ToolChange(tool),
            Err(_) => Line::Other,
        });
    }
    if let Some(caps) = move_re().captures(code) {
        return Ok(Line::Move(parse_move(code, &caps[1] == "0")?));
    }
    if arc_re().is_match(code) {
        return Ok(Line::Arc(parse_move(code, false)?));
    }
    if home_re().is_match(code) {
        return Ok(Line::Home(parse_home(code)));
    }
    if reset_re().is_match(code) {
        return Ok(Line::Reset(parse_reset(code)?));
    }
    if m82_re().is_match(code) {
        return Ok(Line::AbsoluteExtrusion);
    }
    if m83_re().is_match(code) {
        return Ok(Line::RelativeExtrusion);
    }
    Ok(Line::Other)
}
