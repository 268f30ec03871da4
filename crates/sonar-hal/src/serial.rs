//! Serial output over any [`std::io::Write`].

use crate::SerialPort;
use sonar_common::{SonarError, SonarResult};
use std::io::Write;

/// Line terminator used by the board's terminal.
pub const LINE_ENDING: &str = "\r\n";

/// Serial port writing lines to a byte sink.
#[derive(Debug)]
pub struct WriterSerial<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> WriterSerial<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Unwrap the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Serial port on the process's standard output.
#[must_use]
pub fn stdout_serial() -> WriterSerial<std::io::Stdout> {
    WriterSerial::new(std::io::stdout())
}

impl<W: Write + Send> SerialPort for WriterSerial<W> {
    fn write_line(&mut self, line: &str) -> SonarResult<()> {
        self.writer
            .write_all(line.as_bytes())
            .and_then(|()| self.writer.write_all(LINE_ENDING.as_bytes()))
            .and_then(|()| self.writer.flush())
            .map_err(|e| SonarError::Serial(e.to_string()))
    }
}
