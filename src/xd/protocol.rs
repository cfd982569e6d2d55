// Xeryon XD line protocol
//
// Every transaction is one ASCII line out and one line back:
//   set:   [A:]NAME=value\n   ->  [A:]NAME=value\n
//   query: [A:]NAME=?\n       ->  [A:]NAME=value\n
// The optional "A:" prefix selects an axis on multi-axis controllers.

use serialport::{ClearBuffer, SerialPort};
use std::fmt;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, warn};

use super::error::{Result, XdError};
use crate::config::{DEFAULT_TIMEOUT, LINE_TERMINATOR, MAX_LINE_LEN, MAX_STALE_LINES};

/// Wire command vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Stat, // status word, read-only
    Epos, // encoder position, read-only
    Dpos, // target position
    Sspd, // velocity setpoint
    Step, // relative move, write-only
    Indx, // index search (homing) direction, write-only
    Zero, // force outputs to zero, write-only
    Freq, // excitation frequency, read-only
    Info, // unsolicited-message toggle, write-only
    Ptol, // position tolerance 1
    Pto2, // position tolerance 2
    Test, // LED test
    Soft, // firmware version, read-only
    Srno, // serial number, read-only
}

impl Command {
    pub fn name(self) -> &'static str {
        match self {
            Command::Stat => "STAT",
            Command::Epos => "EPOS",
            Command::Dpos => "DPOS",
            Command::Sspd => "SSPD",
            Command::Step => "STEP",
            Command::Indx => "INDX",
            Command::Zero => "ZERO",
            Command::Freq => "FREQ",
            Command::Info => "INFO",
            Command::Ptol => "PTOL",
            Command::Pto2 => "PTO2",
            Command::Test => "TEST",
            Command::Soft => "SOFT",
            Command::Srno => "SRNO",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed command payload
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Int(v) => Some(v as f64),
            Value::Float(v) => Some(v),
            Value::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// Type the caller expects back from a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Float,
    Text,
}

/// Build the wire line (without terminator) for a set or query
pub fn format_command(prefix: Option<char>, name: &str, value: Option<&Value>) -> String {
    let mut line = String::with_capacity(16);
    if let Some(p) = prefix {
        line.push(p);
        line.push(':');
    }
    line.push_str(name);
    line.push('=');
    match value {
        Some(v) => line.push_str(&v.to_string()),
        None => line.push('?'),
    }
    line
}

/// Split a reply at the first '=' into (echo, payload)
pub fn split_reply(line: &str) -> Option<(&str, &str)> {
    line.split_once('=')
}

/// Coerce a reply payload to the expected type
///
/// A payload that does not parse is a protocol error, never a silent zero.
pub fn decode_value(command: &str, reply: &str, payload: &str, kind: ValueKind) -> Result<Value> {
    let text = payload.trim();
    match kind {
        ValueKind::Int => text
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| XdError::protocol(command, reply, format!("not an integer: {}", e))),
        ValueKind::Float => text
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| XdError::protocol(command, reply, format!("not a number: {}", e))),
        ValueKind::Text => Ok(Value::Text(text.to_string())),
    }
}

/// Line-oriented duplex channel to one controller
pub trait Transport: Send {
    /// Drop whatever has been received but not read yet
    fn clear_input(&mut self) -> std::io::Result<()>;

    /// Write one line, appending the terminator
    fn write_line(&mut self, line: &str) -> std::io::Result<()>;

    /// Block until one full line arrives or the channel times out
    fn read_line(&mut self) -> std::io::Result<String>;
}

/// Byte stream with a receive buffer that can be discarded
pub trait LinePort: Read + Write + Send {
    fn clear_input(&mut self) -> std::io::Result<()>;
}

impl LinePort for Box<dyn SerialPort> {
    fn clear_input(&mut self) -> std::io::Result<()> {
        self.as_mut()
            .clear(ClearBuffer::Input)
            .map_err(std::io::Error::from)
    }
}

/// Terminated-line framing over any byte stream
pub struct LineTransport<P> {
    port: P,
}

impl<P: LinePort> LineTransport<P> {
    pub fn new(port: P) -> Self {
        Self { port }
    }
}

impl<P: LinePort> Transport for LineTransport<P> {
    fn clear_input(&mut self) -> std::io::Result<()> {
        self.port.clear_input()
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(LINE_TERMINATOR);
        self.port.write_all(&bytes)?;
        self.port.flush()
    }

    fn read_line(&mut self) -> std::io::Result<String> {
        let mut line = Vec::with_capacity(32);
        let mut byte = [0u8; 1];
        loop {
            let n = self.port.read(&mut byte)?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "channel closed",
                ));
            }
            match byte[0] {
                LINE_TERMINATOR => {
                    // Blank lines (stray CR/LF pairs) carry nothing
                    if line.is_empty() {
                        continue;
                    }
                    break;
                }
                b'\r' => {}
                b => {
                    if line.len() >= MAX_LINE_LEN {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("line exceeds {} bytes", MAX_LINE_LEN),
                        ));
                    }
                    line.push(b);
                }
            }
        }
        String::from_utf8(line)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Line transport over a real serial port
pub type SerialTransport = LineTransport<Box<dyn SerialPort>>;

impl SerialTransport {
    /// Open a serial port with the default transport timeout
    pub fn open(port_name: &str, baudrate: u32) -> Result<Self> {
        Self::open_with_timeout(port_name, baudrate, DEFAULT_TIMEOUT)
    }

    pub fn open_with_timeout(port_name: &str, baudrate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(port_name, baudrate).timeout(timeout).open()?;
        Ok(Self::new(port))
    }
}

// Write one line, read the reply and verify its echo
//
// Input left over from an earlier transaction is dropped before writing. A
// reply that still shows up late is skipped until the expected echo arrives.
// Returns (sent line, raw reply, payload offset).
fn exchange(
    transport: &mut dyn Transport,
    prefix: Option<char>,
    name: &str,
    value: Option<&Value>,
) -> Result<(String, String, usize)> {
    let line = format_command(prefix, name, value);
    let expected = match prefix {
        Some(p) => format!("{}:{}", p, name),
        None => name.to_string(),
    };

    transport
        .clear_input()
        .map_err(|e| XdError::from_io(&line, e))?;
    debug!("-> {}", line);
    transport
        .write_line(&line)
        .map_err(|e| XdError::from_io(&line, e))?;

    let mut stale: Option<String> = None;
    for _ in 0..=MAX_STALE_LINES {
        let reply = match transport.read_line() {
            Ok(reply) => reply,
            Err(e) => {
                return Err(match stale {
                    Some(stale) if e.kind() == std::io::ErrorKind::TimedOut => {
                        XdError::protocol(
                            &line,
                            &stale,
                            format!("echo mismatch, expected {}", expected),
                        )
                    }
                    _ => XdError::from_io(&line, e),
                });
            }
        };
        debug!("<- {}", reply);

        match split_reply(&reply) {
            Some((echo, _)) if echo.trim() == expected => {
                let offset = echo.len() + 1;
                return Ok((line, reply, offset));
            }
            _ => {
                warn!("{}: skipping unexpected reply '{}'", line, reply);
                stale = Some(reply);
            }
        }
    }

    Err(XdError::protocol(
        &line,
        stale.as_deref().unwrap_or_default(),
        format!("no {} echo within {} lines", expected, MAX_STALE_LINES + 1),
    ))
}

/// Perform one write-then-read round trip and return the reply payload
///
/// The caller must hold exclusive access to the transport for the duration.
pub fn transact(
    transport: &mut dyn Transport,
    prefix: Option<char>,
    name: &str,
    value: Option<&Value>,
) -> Result<String> {
    let (_, reply, offset) = exchange(transport, prefix, name, value)?;
    Ok(reply[offset..].to_string())
}

/// Query a value and decode it as `kind`
pub fn query(
    transport: &mut dyn Transport,
    prefix: Option<char>,
    name: &str,
    kind: ValueKind,
) -> Result<Value> {
    let (line, reply, offset) = exchange(transport, prefix, name, None)?;
    decode_value(&line, &reply, &reply[offset..], kind)
}
