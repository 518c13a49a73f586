//! ANSI escape sequences to styled spans.
//!
//! Log lines written by managed processes often carry SGR color codes.
//! They are parsed into plain-data spans that serialize to JSON, so a
//! browser or terminal frontend can render colors without ever seeing raw
//! control characters.

use serde::Serialize;

/// Text attributes carried by a span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Attrs {
    #[serde(skip_serializing_if = "is_false")]
    pub bold: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub dim: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub italic: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub underline: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub inverse: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub hidden: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub strike: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A color as frontends understand it: one of the sixteen named terminal
/// colors or an `#rrggbb` value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Color {
    Named(&'static str),
    Rgb(String),
}

const NAMED: [&str; 8] = ["black", "red", "green", "yellow", "blue", "magenta", "cyan", "white"];
const BRIGHT: [&str; 8] = [
    "bright-black",
    "bright-red",
    "bright-green",
    "bright-yellow",
    "bright-blue",
    "bright-magenta",
    "bright-cyan",
    "bright-white",
];

fn basic_color(index: i32, bright: bool) -> Option<Color> {
    let table = if bright { &BRIGHT } else { &NAMED };
    usize::try_from(index)
        .ok()
        .and_then(|i| table.get(i))
        .map(|name| Color::Named(*name))
}

fn rgb(r: u8, g: u8, b: u8) -> Color {
    Color::Rgb(format!("#{:02x}{:02x}{:02x}", r, g, b))
}

/// xterm 256-color palette entry.
fn indexed_color(index: u8) -> Color {
    match index {
        0..=7 => Color::Named(NAMED[index as usize]),
        8..=15 => Color::Named(BRIGHT[index as usize - 8]),
        16..=231 => {
            let i = index - 16;
            let level = |v: u8| if v == 0 { 0 } else { 55 + v * 40 };
            rgb(level(i / 36), level((i / 6) % 6), level(i % 6))
        }
        232..=255 => {
            let v = 8 + (index - 232) * 10;
            rgb(v, v, v)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StyledSpan {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fg: Option<Color>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bg: Option<Color>,
    #[serde(flatten)]
    pub attrs: Attrs,
}

/// One log line, split into styled spans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StyledLine {
    pub spans: Vec<StyledSpan>,
}

impl StyledLine {
    /// The line's visible text with all escapes removed.
    pub fn plain(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default)]
struct SgrState {
    fg: Option<Color>,
    bg: Option<Color>,
    attrs: Attrs,
}

/// Parse one line of text. SGR (`ESC [ ... m`) sequences become styles;
/// other CSI and OSC sequences are dropped. A carriage return discards
/// what preceded it, as a terminal would overwrite it.
pub fn parse_line(text: &str) -> StyledLine {
    let mut spans: Vec<StyledSpan> = Vec::new();
    let mut buffer = String::new();
    let mut state = SgrState::default();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\x1b' => match chars.peek() {
                Some('[') => {
                    chars.next();
                    let mut params = String::new();
                    let mut final_byte = None;
                    while let Some(&c) = chars.peek() {
                        chars.next();
                        if ('@'..='~').contains(&c) {
                            final_byte = Some(c);
                            break;
                        }
                        params.push(c);
                    }
                    if final_byte == Some('m') {
                        flush(&mut spans, &mut buffer, &state);
                        apply_sgr(&mut state, &params);
                    }
                }
                Some(']') => {
                    chars.next();
                    while let Some(next) = chars.next() {
                        if next == '\x07' {
                            break;
                        }
                        if next == '\x1b' && matches!(chars.peek(), Some('\\')) {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            },
            '\r' => {
                buffer.clear();
                spans.clear();
            }
            _ => buffer.push(ch),
        }
    }
    flush(&mut spans, &mut buffer, &state);
    StyledLine { spans }
}

fn flush(spans: &mut Vec<StyledSpan>, buffer: &mut String, state: &SgrState) {
    if buffer.is_empty() {
        return;
    }
    spans.push(StyledSpan {
        text: std::mem::take(buffer),
        fg: state.fg.clone(),
        bg: state.bg.clone(),
        attrs: state.attrs,
    });
}

fn parse_params(params: &str) -> Vec<i32> {
    if params.is_empty() {
        return vec![0];
    }
    let values: Vec<i32> = params
        .split(';')
        .filter_map(|p| if p.is_empty() { Some(0) } else { p.parse().ok() })
        .collect();
    if values.is_empty() {
        vec![0]
    } else {
        values
    }
}

fn apply_sgr(state: &mut SgrState, params: &str) {
    let values = parse_params(params);
    let mut i = 0;
    while i < values.len() {
        match values[i] {
            0 => *state = SgrState::default(),
            1 => state.attrs.bold = true,
            2 => state.attrs.dim = true,
            3 => state.attrs.italic = true,
            4 => state.attrs.underline = true,
            7 => state.attrs.inverse = true,
            8 => state.attrs.hidden = true,
            9 => state.attrs.strike = true,
            22 => {
                state.attrs.bold = false;
                state.attrs.dim = false;
            }
            23 => state.attrs.italic = false,
            24 => state.attrs.underline = false,
            27 => state.attrs.inverse = false,
            28 => state.attrs.hidden = false,
            29 => state.attrs.strike = false,
            v @ 30..=37 => state.fg = basic_color(v - 30, false),
            v @ 90..=97 => state.fg = basic_color(v - 90, true),
            v @ 40..=47 => state.bg = basic_color(v - 40, false),
            v @ 100..=107 => state.bg = basic_color(v - 100, true),
            39 => state.fg = None,
            49 => state.bg = None,
            v @ (38 | 48) => {
                if let Some((advance, color)) = extended_color(&values[i + 1..]) {
                    if v == 38 {
                        state.fg = Some(color);
                    } else {
                        state.bg = Some(color);
                    }
                    i += advance;
                }
            }
            _ => {}
        }
        i += 1;
    }
}

/// `5;n` (palette) or `2;r;g;b` (truecolor). Returns values consumed.
fn extended_color(values: &[i32]) -> Option<(usize, Color)> {
    match values.first()? {
        5 => {
            let index = u8::try_from(*values.get(1)?).ok()?;
            Some((2, indexed_color(index)))
        }
        2 => {
            let r = u8::try_from(*values.get(1)?).ok()?;
            let g = u8::try_from(*values.get(2)?).ok()?;
            let b = u8::try_from(*values.get(3)?).ok()?;
            Some((4, rgb(r, g, b)))
        }
        _ => None,
    }
}
