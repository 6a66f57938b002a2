// Line-oriented text command protocol
//
// Commands are ASCII lines terminated by '\n'. Every command gets exactly one
// reply line starting with "OK: " or "ERR: ".

use core::fmt::Write;

use heapless::String;

use crate::config::params::LINE_CAPACITY;
use crate::fmt::*;

/// Reply buffer size (200 samples of up to "255 " plus prefix and newline)
pub const RESPONSE_CAPACITY: usize = 816;

/// One received line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    text: String<{ LINE_CAPACITY - 1 }>,
    truncated: bool,
}

impl Line {
    pub fn as_str(&self) -> &str {
        self.text.as_str()
    }

    /// True if the sender wrote more than the buffer holds
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

/// Accumulates bytes until a line terminator arrives
pub struct LineBuffer {
    text: String<{ LINE_CAPACITY - 1 }>,
    truncated: bool,
}

impl LineBuffer {
    pub const fn new() -> Self {
        Self {
            text: String::new(),
            truncated: false,
        }
    }

    /// Feed one received byte
    ///
    /// # Returns
    /// * `Some(line)` when `\n` ends a non-empty line
    /// * `None` otherwise
    ///
    /// `\r`, NUL and bytes with the high bit set are dropped. Some terminals
    /// send stray 0xF0 bytes and blank lines when they connect.
    pub fn push(&mut self, byte: u8) -> Option<Line> {
        match byte {
            b'\r' | 0 => None,
            b'\n' => {
                if self.text.is_empty() && !self.truncated {
                    return None;
                }
                let line = Line {
                    text: core::mem::take(&mut self.text),
                    truncated: self.truncated,
                };
                self.truncated = false;
                Some(line)
            }
            b if b & 0x80 != 0 => None,
            b => {
                if self.text.push(char::from(b)).is_err() {
                    self.truncated = true;
                }
                None
            }
        }
    }

    /// Discard a partially received line
    pub fn clear(&mut self) {
        self.text.clear();
        self.truncated = false;
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Parsed command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Identify the device
    Hello,
    /// Start the PWM; fails if it is already running
    Pwm {
        hz: u32,
        duty1024: u32,
        dead_clocks: Option<u32>,
    },
    /// Capture one PWM period from an ADC channel
    Adc { channel: u32 },
    /// Stop the PWM
    Stop,
    /// Change a tuning parameter used by the next start
    Set { name: &'a str, value: u32 },
    /// Start the PWM or retune it while running
    Run { hz: u32, duty1024: u32 },
}

/// The line does not match any command form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SyntaxError;

impl<'a> Command<'a> {
    /// Parse a line
    ///
    /// Command names are case-insensitive. Arguments are unsigned decimal
    /// numbers separated by one or more spaces. Trailing tokens are rejected.
    pub fn parse(line: &'a str) -> Result<Self, SyntaxError> {
        let mut tokens = line.split(' ').filter(|t| !t.is_empty());
        let name = tokens.next().ok_or(SyntaxError)?;

        let command = if name.eq_ignore_ascii_case("HELLO") {
            Command::Hello
        } else if name.eq_ignore_ascii_case("PWM") {
            let hz = number(tokens.next())?;
            let duty1024 = number(tokens.next())?;
            let dead_clocks = tokens.next().map(|t| number(Some(t))).transpose()?;
            Command::Pwm {
                hz,
                duty1024,
                dead_clocks,
            }
        } else if name.eq_ignore_ascii_case("ADC") {
            Command::Adc {
                channel: number(tokens.next())?,
            }
        } else if name.eq_ignore_ascii_case("STOP") {
            Command::Stop
        } else if name.eq_ignore_ascii_case("SET") {
            let name = tokens.next().ok_or(SyntaxError)?;
            Command::Set {
                name,
                value: number(tokens.next())?,
            }
        } else if name.eq_ignore_ascii_case("RUN") {
            Command::Run {
                hz: number(tokens.next())?,
                duty1024: number(tokens.next())?,
            }
        } else {
            return Err(SyntaxError);
        };

        if tokens.next().is_some() {
            return Err(SyntaxError);
        }
        Ok(command)
    }
}

fn number(token: Option<&str>) -> Result<u32, SyntaxError> {
    let token = token.ok_or(SyntaxError)?;
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SyntaxError);
    }
    // overflow is a syntax error too
    token.parse().map_err(|_| SyntaxError)
}

/// Reply line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    text: String<RESPONSE_CAPACITY>,
    ok: bool,
}

impl Response {
    /// `OK: <message>`
    pub fn ok(message: &str) -> Self {
        Self::ok_with(|w| w.write_str(message))
    }

    /// `OK: ` followed by whatever `body` writes
    ///
    /// Output that does not fit is cut off; the line terminator is always kept.
    pub fn ok_with(body: impl FnOnce(&mut String<RESPONSE_CAPACITY>) -> core::fmt::Result) -> Self {
        let mut text = String::new();
        let _ = text.push_str("OK: ");
        if body(&mut text).is_err() {
            warn!("Response truncated");
        }
        Self::terminate(text, true)
    }

    /// `ERR: <message>` or `ERR: <message> [<param>]`
    pub fn error(message: &str, param: Option<&str>) -> Self {
        let mut text = String::new();
        let _ = text.push_str("ERR: ");
        let _ = text.push_str(message);
        if let Some(param) = param {
            let _ = write!(text, " [{}]", param);
        }
        Self::terminate(text, false)
    }

    /// `ERR: Syntax error [<line>]`
    pub fn syntax_error(line: &str) -> Self {
        Self::error("Syntax error", Some(line))
    }

    fn terminate(mut text: String<RESPONSE_CAPACITY>, ok: bool) -> Self {
        if text.push('\n').is_err() {
            text.pop();
            let _ = text.push('\n');
        }
        Self { text, ok }
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    pub fn as_str(&self) -> &str {
        self.text.as_str()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }
}
