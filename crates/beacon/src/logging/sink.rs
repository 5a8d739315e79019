// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Local destinations for log records.
//!
//! A sink either writes a record or reports an I/O error. The aggregator counts and drops
//! such errors for that sink only; a failing sink never affects the caller or other sinks.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;

use crate::logging::level::LogLevel;
use crate::sample::LogRecord;

pub trait LogSink: Send + Sync {
    fn write(&self, record: &LogRecord) -> io::Result<()>;
}

/// Prints the bare message, one line per record.
pub struct ConsoleSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleSink {
    #[must_use]
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    #[must_use]
    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl LogSink for ConsoleSink {
    fn write(&self, record: &LogRecord) -> io::Result<()> {
        let mut out = self.out.lock().map_err(|_| io::Error::other("console sink poisoned"))?;
        writeln!(out, "{}", record.message)?;
        out.flush()
    }
}

/// Appends formatted lines to a per-process log file.
///
/// ```text
/// 1700000000123 ms | host-a | calculator | 4242 | warning | disk almost full
/// ```
pub struct FileSink {
    path: PathBuf,
    file: Mutex<BufWriter<File>>,
}

impl FileSink {
    /// Creates `<YYYY-mm-dd-HH-MM-SS>_<unit>_<pid>.log` inside `directory`.
    pub fn create(directory: &Path, unit_name: &str, process_id: u32) -> io::Result<Self> {
        let file_name = format!(
            "{}_{}_{}.log",
            Local::now().format("%Y-%m-%d-%H-%M-%S"),
            unit_name,
            process_id
        );
        let path = directory.join(file_name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(BufWriter::new(file)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub(crate) fn format_file_line(record: &LogRecord) -> String {
    let level = match record.level {
        LogLevel::None | LogLevel::All => "",
        level => level.as_str(),
    };
    format!(
        "{} ms | {} | {} | {} | {} | {}",
        record.timestamp / 1000,
        record.host_name,
        record.unit_name,
        record.process_id,
        level,
        record.message
    )
}

impl LogSink for FileSink {
    fn write(&self, record: &LogRecord) -> io::Result<()> {
        let mut file = self.file.lock().map_err(|_| io::Error::other("file sink poisoned"))?;
        writeln!(file, "{}", format_file_line(record))?;
        file.flush()
    }
}
