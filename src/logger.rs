//! Progress logging and the profile CSV sink.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// How much the search reports while running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verbosity {
    /// No output.
    #[default]
    Silent,
    /// Periodic progress lines on standard output.
    Info,
}

impl From<bool> for Verbosity {
    fn from(verbose: bool) -> Self {
        if verbose {
            Verbosity::Info
        } else {
            Verbosity::Silent
        }
    }
}

/// Progress reporter for the search loop.
///
/// Worker 0 calls [`SearchLogger::progress`] on tick boundaries; everything
/// is a no-op when silent.
#[derive(Debug, Clone, Copy)]
pub struct SearchLogger {
    verbosity: Verbosity,
}

impl SearchLogger {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    #[inline]
    pub fn is_silent(&self) -> bool {
        self.verbosity == Verbosity::Silent
    }

    /// One progress line: elapsed time, objective interval, graph and queue
    /// sizes.
    pub fn progress(
        &self,
        elapsed: f64,
        lowerbound: f32,
        upperbound: f32,
        graph_size: usize,
        queue_size: usize,
    ) {
        if self.is_silent() {
            return;
        }
        println!(
            "time: {elapsed:.3}s, objective: [{lowerbound}, {upperbound}], \
             graph: {graph_size}, queue: {queue_size}"
        );
    }

    /// Free-form status line, used around initialization and completion.
    pub fn status(&self, message: &str) {
        if !self.is_silent() {
            println!("{message}");
        }
    }
}

/// Append-only CSV sink for per-tick runtime statistics.
pub struct ProfileSink {
    file: File,
}

impl ProfileSink {
    /// Create the file and write the header row.
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        writeln!(
            file,
            "iterations,time,lower_bound,upper_bound,graph_size,queue_size,explore,exploit"
        )?;
        Ok(Self { file })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn row(
        &mut self,
        iterations: u64,
        time: f64,
        lower_bound: f32,
        upper_bound: f32,
        graph_size: usize,
        queue_size: usize,
        explore: u64,
        exploit: u64,
    ) -> std::io::Result<()> {
        writeln!(
            self.file,
            "{iterations},{time},{lower_bound},{upper_bound},{graph_size},{queue_size},{explore},{exploit}"
        )?;
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_from_flag() {
        assert_eq!(Verbosity::from(false), Verbosity::Silent);
        assert_eq!(Verbosity::from(true), Verbosity::Info);
        assert!(SearchLogger::new(Verbosity::Silent).is_silent());
    }

    #[test]
    fn profile_sink_writes_header_and_rows() {
        let dir = std::env::temp_dir().join("osdt-logger");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("profile.csv");
        let mut sink = ProfileSink::create(&path).unwrap();
        sink.row(10, 0.5, 0.0, 1.0, 3, 2, 7, 3).unwrap();
        drop(sink);

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "iterations,time,lower_bound,upper_bound,graph_size,queue_size,explore,exploit"
        );
        assert_eq!(lines.next().unwrap(), "10,0.5,0,1,3,2,7,3");
    }
}
