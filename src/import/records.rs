use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use csv::{Position, ReaderBuilder, StringRecord};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("failed to open {path}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("malformed record at line {line}")]
    Parse {
        line: u64,
        #[source]
        source: csv::Error,
    },
}

/// One parsed line of delimited text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Physical line the record starts on (1-based).
    pub line: u64,
    pub fields: Vec<String>,
}

impl Record {
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// A record with no fields, or with a single whitespace-only field.
    pub fn is_blank(&self) -> bool {
        match self.fields.as_slice() {
            [] => true,
            [only] => only.trim().is_empty(),
            _ => false,
        }
    }
}

const OPEN_RUN: u64 = u64::MAX;

/// Pass-through reader that remembers where `\n` bytes and runs of line
/// terminators fall.
///
/// The `csv` reader silently drops empty lines, and the position it hands
/// back for a record is where the previous record stopped. Both are
/// corrected here: the record's first field starts after any terminator
/// run covering that position, and its line is one past the number of
/// `\n` bytes before that.
struct LineTracking<R> {
    inner: R,
    offset: u64,
    /// `\n` offsets not yet folded into `lines_passed`.
    newlines: VecDeque<u64>,
    /// Half-open `[start, end)` runs of `\r`/`\n` bytes.
    runs: VecDeque<(u64, u64)>,
    lines_passed: u64,
}

impl<R> LineTracking<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            newlines: VecDeque::new(),
            runs: VecDeque::new(),
            lines_passed: 0,
        }
    }

    /// Physical line of the first field at or after byte `pos`. Positions
    /// must not go backwards between calls.
    fn line_at(&mut self, pos: u64) -> u64 {
        while matches!(self.runs.front(), Some(&(_, end)) if end <= pos) {
            self.runs.pop_front();
        }
        let start = match self.runs.front() {
            Some(&(run_start, end)) if run_start <= pos => end.min(self.offset),
            _ => pos,
        };
        while matches!(self.newlines.front(), Some(&at) if at < start) {
            self.newlines.pop_front();
            self.lines_passed += 1;
        }
        self.lines_passed + 1
    }
}

impl<R: Read> Read for LineTracking<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        for (i, &byte) in buf[..n].iter().enumerate() {
            let at = self.offset + i as u64;
            let terminator = byte == b'\n' || byte == b'\r';
            if byte == b'\n' {
                self.newlines.push_back(at);
            }
            match self.runs.back_mut() {
                Some((_, end)) if *end == OPEN_RUN => {
                    if !terminator {
                        *end = at;
                    }
                }
                _ if terminator => self.runs.push_back((at, OPEN_RUN)),
                _ => {}
            }
        }
        self.offset += n as u64;
        Ok(n)
    }
}

/// Quote-aware comma-separated reader. Records may differ in length; the
/// caller decides what a length mismatch means.
pub struct RecordReader<R: Read> {
    inner: csv::Reader<LineTracking<R>>,
    buf: StringRecord,
    last_line: u64,
}

impl RecordReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, RecordError> {
        let file = File::open(path).map_err(|source| RecordError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: Read> RecordReader<R> {
    pub fn from_reader(reader: R) -> Self {
        let inner = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(LineTracking::new(reader));
        Self {
            inner,
            buf: StringRecord::new(),
            last_line: 0,
        }
    }

    /// Reads the next record, or `None` at end of input.
    pub fn next_record(&mut self) -> Result<Option<Record>, RecordError> {
        match self.inner.read_record(&mut self.buf) {
            Ok(false) => Ok(None),
            Ok(true) => {
                let byte = self.buf.position().map(Position::byte);
                let line = self.line_of(byte);
                Ok(Some(Record {
                    line,
                    fields: self.buf.iter().map(str::to_owned).collect(),
                }))
            }
            Err(source) => {
                let line = self.line_of(source.position().map(Position::byte));
                Err(RecordError::Parse { line, source })
            }
        }
    }

    fn line_of(&mut self, byte: Option<u64>) -> u64 {
        let line = match byte {
            Some(byte) => self.inner.get_mut().line_at(byte),
            None => self.last_line + 1,
        };
        self.last_line = line;
        line
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Record, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
