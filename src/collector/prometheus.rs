//! Prometheus text-exposition (0.0.4) parsing
//!
//! Parses the subset of the format pods actually expose: `# HELP`/`# TYPE`
//! comment lines, blank lines, and samples of the form
//! `name{label="value",...} value [timestamp_ms]`. Label values support the
//! format's escapes (`\\`, `\"`, `\n`). A malformed line fails the whole
//! parse; the caller skips that pod.

use std::collections::HashMap;
use std::fmt;

/// One parsed sample line.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub name: String,
    pub labels: HashMap<String, String>,
    pub value: f64,
    pub timestamp_ms: Option<i64>,
}

/// Parse failure with the offending line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parse a full exposition body into samples.
pub fn parse_text(input: &str) -> Result<Vec<RawSample>, ParseError> {
    let mut samples = Vec::new();
    for (idx, line) in input.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        samples.push(parse_sample(line, line_no)?);
    }
    Ok(samples)
}

fn parse_sample(line: &str, line_no: usize) -> Result<RawSample, ParseError> {
    let err = |message: String| ParseError {
        line: line_no,
        message,
    };

    let name_end = line
        .find(|c: char| !is_name_char(c))
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if name.is_empty() || !is_name_start(name.chars().next().unwrap()) {
        return Err(err(format!("invalid metric name in '{line}'")));
    }

    let mut rest = line[name_end..].trim_start();
    let labels = if rest.starts_with('{') {
        let (labels, after) = parse_labels(rest, line_no)?;
        rest = after.trim_start();
        labels
    } else {
        HashMap::new()
    };

    let mut fields = rest.split_whitespace();
    let value_str = fields
        .next()
        .ok_or_else(|| err(format!("missing value in '{line}'")))?;
    let value = parse_value(value_str)
        .ok_or_else(|| err(format!("invalid sample value '{value_str}'")))?;

    let timestamp_ms = match fields.next() {
        None => None,
        Some(ts) => Some(
            ts.parse::<i64>()
                .map_err(|_| err(format!("invalid timestamp '{ts}'")))?,
        ),
    };
    if fields.next().is_some() {
        return Err(err(format!("trailing garbage in '{line}'")));
    }

    Ok(RawSample {
        name: name.to_string(),
        labels,
        value,
        timestamp_ms,
    })
}

/// Parse a `{k="v",...}` block; returns the labels and the remainder after
/// the closing brace.
fn parse_labels(input: &str, line_no: usize) -> Result<(HashMap<String, String>, &str), ParseError> {
    let err = |message: String| ParseError {
        line: line_no,
        message,
    };

    let mut labels = HashMap::new();
    let mut chars = input.char_indices().peekable();
    chars.next(); // consume '{'

    loop {
        // Allow `{}` and a trailing comma before `}`.
        while let Some(&(_, c)) = chars.peek() {
            if c == ',' || c.is_whitespace() {
                chars.next();
            } else {
                break;
            }
        }
        let start = match chars.peek() {
            Some(&(i, '}')) => {
                chars.next();
                return Ok((labels, &input[i + 1..]));
            }
            Some(&(i, _)) => i,
            None => return Err(err("unterminated label block".into())),
        };

        // Label name up to '='.
        let mut eq = None;
        for (i, c) in chars.by_ref() {
            if c == '=' {
                eq = Some(i);
                break;
            }
            if !is_name_char(c) {
                return Err(err(format!("invalid label name character '{c}'")));
            }
        }
        let eq = eq.ok_or_else(|| err("label missing '='".into()))?;
        let label_name = input[start..eq].to_string();
        if label_name.is_empty() {
            return Err(err("empty label name".into()));
        }

        // Quoted value with escapes.
        match chars.next() {
            Some((_, '"')) => {}
            _ => return Err(err(format!("label '{label_name}' value must be quoted"))),
        }
        let mut value = String::new();
        let mut closed = false;
        while let Some((_, c)) = chars.next() {
            match c {
                '"' => {
                    closed = true;
                    break;
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, '"')) => value.push('"'),
                    Some((_, '\\')) => value.push('\\'),
                    Some((_, other)) => {
                        return Err(err(format!("unknown escape '\\{other}'")));
                    }
                    None => return Err(err("dangling escape".into())),
                },
                other => value.push(other),
            }
        }
        if !closed {
            return Err(err(format!("unterminated value for label '{label_name}'")));
        }
        labels.insert(label_name, value);
    }
}

/// Sample values are floats plus the format's special tokens.
fn parse_value(s: &str) -> Option<f64> {
    match s {
        "+Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => s.parse::<f64>().ok(),
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}
