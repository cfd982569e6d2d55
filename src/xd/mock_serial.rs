//! Scripted serial port used by unit tests to emulate an XD controller.
//!
//! The mock keeps a register file keyed by the full echo name (including any
//! axis prefix, e.g. `X:EPOS`). Queries answer from the register file, sets are
//! stored and echoed back. Individual commands can be made to time out, to
//! answer with an arbitrary line, or to answer only after the next command has
//! been written.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use super::protocol::LinePort;

enum Reply {
    Line(Vec<u8>),
    Timeout,
}

#[derive(Default)]
struct State {
    registers: HashMap<String, String>,
    overrides: HashMap<String, String>,
    failing: HashSet<String>,
    late: HashSet<String>,
    held: Vec<Vec<u8>>,
    pending_write: Vec<u8>,
    raw_written: Vec<u8>,
    written_lines: Vec<String>,
    replies: VecDeque<Reply>,
    crlf: bool,
    write_error: bool,
}

impl State {
    fn handle_line(&mut self, line: String) {
        self.written_lines.push(line.clone());
        // Replies held back from the previous command arrive first
        for bytes in std::mem::take(&mut self.held) {
            self.replies.push_back(Reply::Line(bytes));
        }

        let (key, value) = match line.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (line.clone(), String::new()),
        };

        if self.failing.contains(&key) {
            self.replies.push_back(Reply::Timeout);
            return;
        }

        let reply = if let Some(text) = self.overrides.get(&key) {
            text.clone()
        } else if value == "?" {
            let current = self.registers.get(&key).cloned().unwrap_or_else(|| "0".to_string());
            format!("{}={}", key, current)
        } else {
            self.registers.insert(key.clone(), value.clone());
            format!("{}={}", key, value)
        };

        let mut bytes = reply.into_bytes();
        if self.crlf {
            bytes.push(b'\r');
        }
        bytes.push(b'\n');

        if self.late.remove(&key) {
            self.replies.push_back(Reply::Timeout);
            self.held.push(bytes);
        } else {
            self.replies.push_back(Reply::Line(bytes));
        }
    }
}

/// Cloneable handle; every clone talks to the same emulated device
#[derive(Clone, Default)]
pub struct MockSerial {
    state: Arc<Mutex<State>>,
}

impl MockSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload a register; `key` includes the axis prefix if any
    pub fn set_register(&self, key: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .registers
            .insert(key.to_string(), value.to_string());
    }

    pub fn register(&self, key: &str) -> Option<String> {
        self.state.lock().unwrap().registers.get(key).cloned()
    }

    /// Answer every transaction on `key` with `reply` verbatim
    pub fn override_reply(&self, key: &str, reply: &str) {
        self.state
            .lock()
            .unwrap()
            .overrides
            .insert(key.to_string(), reply.to_string());
    }

    /// Make every transaction on `key` time out
    pub fn fail_reads_for(&self, key: &str) {
        self.state.lock().unwrap().failing.insert(key.to_string());
    }

    /// Let the next transaction on `key` time out, then deliver its reply
    /// right after the following command is written
    pub fn answer_late(&self, key: &str) {
        self.state.lock().unwrap().late.insert(key.to_string());
    }

    /// Queue a line as if the device had sent it unprompted
    pub fn push_unsolicited(&self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.state.lock().unwrap().replies.push_back(Reply::Line(bytes));
    }

    pub fn heal(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        state.failing.remove(key);
        state.overrides.remove(key);
    }

    pub fn set_write_error(&self, should_error: bool) {
        self.state.lock().unwrap().write_error = should_error;
    }

    pub fn set_crlf(&self, crlf: bool) {
        self.state.lock().unwrap().crlf = crlf;
    }

    pub fn written_lines(&self) -> Vec<String> {
        self.state.lock().unwrap().written_lines.clone()
    }

    pub fn raw_written(&self) -> Vec<u8> {
        self.state.lock().unwrap().raw_written.clone()
    }

    pub fn clear_written(&self) {
        let mut state = self.state.lock().unwrap();
        state.written_lines.clear();
        state.raw_written.clear();
    }
}

impl LinePort for MockSerial {
    fn clear_input(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().replies.clear();
        Ok(())
    }
}

impl Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.write_error {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated disconnect"));
        }
        state.raw_written.extend_from_slice(buf);
        for &b in buf {
            if b == b'\n' {
                let bytes = std::mem::take(&mut state.pending_write);
                let line = String::from_utf8_lossy(&bytes).into_owned();
                state.handle_line(line);
            } else {
                state.pending_write.push(b);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.state.lock().unwrap().write_error {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated disconnect"));
        }
        Ok(())
    }
}

impl Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        match state.replies.front_mut() {
            None => Err(io::Error::new(io::ErrorKind::TimedOut, "no data")),
            Some(Reply::Timeout) => {
                state.replies.pop_front();
                Err(io::Error::new(io::ErrorKind::TimedOut, "simulated timeout"))
            }
            Some(Reply::Line(bytes)) => {
                let n = buf.len().min(bytes.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                bytes.drain(..n);
                if bytes.is_empty() {
                    state.replies.pop_front();
                }
                Ok(n)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_reply(mock: &mut MockSerial) -> String {
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            mock.read(&mut byte).unwrap();
            if byte[0] == b'\n' {
                break;
            }
            out.push(byte[0]);
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_query_answers_from_registers() {
        let mut mock = MockSerial::new();
        mock.set_register("EPOS", "-12");
        mock.write_all(b"EPOS=?\n").unwrap();
        assert_eq!(read_reply(&mut mock), "EPOS=-12");
    }

    #[test]
    fn test_set_is_stored_and_echoed() {
        let mut mock = MockSerial::new();
        mock.write_all(b"Y:DPOS=100\n").unwrap();
        assert_eq!(read_reply(&mut mock), "Y:DPOS=100");
        assert_eq!(mock.register("Y:DPOS").as_deref(), Some("100"));
    }

    #[test]
    fn test_failing_key_times_out() {
        let mut mock = MockSerial::new();
        mock.fail_reads_for("FREQ");
        mock.write_all(b"FREQ=?\n").unwrap();
        let mut byte = [0u8; 1];
        let err = mock.read(&mut byte).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_late_reply_arrives_after_next_write() {
        let mut mock = MockSerial::new();
        mock.set_register("EPOS", "5");
        mock.answer_late("EPOS");
        mock.write_all(b"EPOS=?\n").unwrap();
        let mut byte = [0u8; 1];
        assert_eq!(mock.read(&mut byte).unwrap_err().kind(), io::ErrorKind::TimedOut);

        mock.write_all(b"STAT=?\n").unwrap();
        assert_eq!(read_reply(&mut mock), "EPOS=5");
        assert_eq!(read_reply(&mut mock), "STAT=0");
    }

    #[test]
    fn test_clear_input_drops_queued_lines() {
        let mut mock = MockSerial::new();
        mock.push_unsolicited("STAT=8");
        mock.clear_input().unwrap();
        let mut byte = [0u8; 1];
        assert_eq!(mock.read(&mut byte).unwrap_err().kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_empty_read_times_out() {
        let mut mock = MockSerial::new();
        let mut byte = [0u8; 1];
        assert_eq!(mock.read(&mut byte).unwrap_err().kind(), io::ErrorKind::TimedOut);
    }
}
