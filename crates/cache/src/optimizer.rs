//! Size reduction for tool output.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Appended to output that was cut to fit the size limit.
pub const TRUNCATION_MARKER: &str = "\n[... output truncated ...]";

/// Blank lines kept in a row before the rest of a run is dropped.
const MAX_BLANK_RUN: usize = 2;

/// A tool result payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Structured(Value),
}

impl Payload {
    /// Size in bytes as it would be sent upstream.
    pub fn size(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Structured(value) => value.to_string().len(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Structured(_) => None,
        }
    }

    /// Render as text; structured payloads become compact JSON.
    pub fn to_text(&self) -> String {
        match self {
            Payload::Text(text) => text.clone(),
            Payload::Structured(value) => value.to_string(),
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

/// Output of a reduction pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduced {
    pub payload: Payload,
    pub original_size: usize,
    pub stored_size: usize,
}

impl Reduced {
    pub fn bytes_saved(&self) -> usize {
        self.original_size.saturating_sub(self.stored_size)
    }
}

/// Shrinks tool output before it is cached or returned.
#[derive(Debug, Clone, Copy)]
pub struct OutputOptimizer {
    max_output_bytes: usize,
}

impl OutputOptimizer {
    /// `max_output_bytes == 0` disables truncation.
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    pub fn max_output_bytes(&self) -> usize {
        self.max_output_bytes
    }

    pub fn reduce(&self, payload: Payload) -> Reduced {
        let original_size = payload.size();
        let payload = match payload {
            Payload::Text(text) => Payload::Text(self.truncate(tidy(&text))),
            Payload::Structured(value) => {
                if self.fits(original_size) {
                    Payload::Structured(value)
                } else {
                    Payload::Text(self.truncate(value.to_string()))
                }
            }
        };
        let stored_size = payload.size();
        Reduced {
            payload,
            original_size,
            stored_size,
        }
    }

    fn fits(&self, size: usize) -> bool {
        self.max_output_bytes == 0 || size <= self.max_output_bytes
    }

    fn truncate(&self, mut text: String) -> String {
        if self.fits(text.len()) {
            return text;
        }
        // A limit too small for the marker gets a bare cut.
        let marker = if self.max_output_bytes > TRUNCATION_MARKER.len() {
            TRUNCATION_MARKER
        } else {
            ""
        };
        let mut cut = self.max_output_bytes - marker.len();
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str(marker);
        text
    }
}

/// Trim trailing whitespace per line and collapse long runs of blank lines.
fn tidy(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > MAX_BLANK_RUN {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    if !text.ends_with('\n') {
        out.pop();
    }
    out
}
