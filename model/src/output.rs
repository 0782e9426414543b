use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use serde_plain::{derive_display_from_serialize, derive_fromstr_from_deserialize};
use std::collections::HashSet;
use std::io::Write;
use std::time::Duration;

/// Printed instead of a message that is identical to the previous one.
const REPEATED_MESSAGE: &str = "...";
const SPINNER_TICK: Duration = Duration::from_millis(120);

/// How progress is shown while waiting on a run or a deletion.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitOutputMode {
    /// Print nothing.
    None,
    /// A single animated line.
    Spinner,
    /// Timestamped progress lines.
    Progress,
}

impl Default for WaitOutputMode {
    fn default() -> Self {
        Self::Spinner
    }
}

derive_display_from_serialize!(WaitOutputMode);
derive_fromstr_from_deserialize!(WaitOutputMode);

/// Remembers what has already been printed during one wait so that each tick only shows what
/// changed.
#[derive(Debug, Default)]
pub struct ProgressDeduplicator {
    seen: HashSet<String>,
    last: Option<String>,
}

/// Lines are compared without surrounding whitespace so that reformatting does not count as a
/// change.
fn line_key(line: &str) -> String {
    line.trim().to_string()
}

fn message_key(message: &str) -> String {
    message
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

impl ProgressDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lines of `message` that should be printed. A message identical to the
    /// previous one collapses to `...`.
    pub fn filter(&mut self, message: &str) -> Vec<String> {
        let message_key = message_key(message);
        if self.last.as_deref() == Some(message_key.as_str()) {
            return vec![REPEATED_MESSAGE.to_string()];
        }
        self.last = Some(message_key);

        let mut lines = Vec::new();
        for line in message.lines() {
            let key = line_key(line);
            if key.is_empty() {
                continue;
            }
            if self.seen.insert(key) {
                lines.push(line.to_string());
            }
        }
        lines
    }
}

/// Writes wait progress according to a `WaitOutputMode`.
pub struct ProgressPrinter {
    mode: WaitOutputMode,
    dedup: ProgressDeduplicator,
    writer: Box<dyn Write + Send>,
    spinner: Option<ProgressBar>,
    timestamps: bool,
}

impl ProgressPrinter {
    /// A printer that writes to stdout.
    pub fn new(mode: WaitOutputMode) -> Self {
        Self::with_writer(mode, Box::new(std::io::stdout()))
    }

    /// A printer that writes `progress` output to `writer`. The spinner always draws to the
    /// terminal.
    pub fn with_writer(mode: WaitOutputMode, writer: Box<dyn Write + Send>) -> Self {
        Self {
            mode,
            dedup: ProgressDeduplicator::new(),
            writer,
            spinner: None,
            timestamps: true,
        }
    }

    /// Leave the `HH:MM:SS` prefix off of progress lines.
    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    pub fn mode(&self) -> WaitOutputMode {
        self.mode
    }

    /// Show one tick worth of progress.
    pub fn update(&mut self, message: &str) {
        match self.mode {
            WaitOutputMode::None => {}
            WaitOutputMode::Spinner => self.spin(),
            WaitOutputMode::Progress => {
                let lines = self.dedup.filter(message);
                let prefix = if self.timestamps {
                    format!("{} ", Local::now().format("%H:%M:%S"))
                } else {
                    String::new()
                };
                for line in lines {
                    // Progress output is best effort, a closed stdout must not fail the wait.
                    let _ = writeln!(self.writer, "{}{}", prefix, line);
                }
                let _ = self.writer.flush();
            }
        }
    }

    /// Stop any animation and print a final message in every mode but `none`.
    pub fn finish(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
        if self.mode != WaitOutputMode::None && !message.is_empty() {
            let _ = writeln!(self.writer, "{}", message);
            let _ = self.writer.flush();
        }
    }

    fn spin(&mut self) {
        if self.spinner.is_none() {
            let spinner = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner} {elapsed} {msg}") {
                spinner.set_style(style);
            }
            spinner.set_message("waiting");
            spinner.enable_steady_tick(SPINNER_TICK);
            self.spinner = Some(spinner);
        }
    }
}

impl Drop for ProgressPrinter {
    fn drop(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// A writer tests can read back.
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn repeated_messages_collapse() {
        let mut dedup = ProgressDeduplicator::new();
        assert_eq!(dedup.filter("a\nb"), vec!["a", "b"]);
        assert_eq!(dedup.filter("a\nb"), vec!["..."]);
        assert_eq!(dedup.filter("a  \n  b"), vec!["..."]);
    }

    #[test]
    fn only_new_lines_are_returned() {
        let mut dedup = ProgressDeduplicator::new();
        assert_eq!(
            dedup.filter("status: running\ne2e: 1/10"),
            vec!["status: running", "e2e: 1/10"]
        );
        assert_eq!(dedup.filter("status: running\ne2e: 2/10"), vec!["e2e: 2/10"]);
        // A line printed earlier is not printed again even when it comes back.
        assert!(dedup.filter("status: running\ne2e: 1/10").is_empty());
    }

    #[test]
    fn progress_mode_prefixes_lines() {
        let buffer = SharedBuffer::default();
        let mut printer =
            ProgressPrinter::with_writer(WaitOutputMode::Progress, Box::new(buffer.clone()));
        printer.update("first");
        printer.update("first");
        let text = buffer.text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" first"));
        assert_eq!(lines[0].len(), "HH:MM:SS first".len());
        assert!(lines[1].ends_with(" ..."));
    }

    #[test]
    fn none_mode_is_silent() {
        let buffer = SharedBuffer::default();
        let mut printer =
            ProgressPrinter::with_writer(WaitOutputMode::None, Box::new(buffer.clone()));
        printer.update("first");
        printer.finish("done");
        assert!(buffer.text().is_empty());
    }

    #[test]
    fn parse_modes() {
        assert_eq!(
            "progress".parse::<WaitOutputMode>().unwrap(),
            WaitOutputMode::Progress
        );
        assert_eq!(WaitOutputMode::default().to_string(), "spinner");
        assert!("loud".parse::<WaitOutputMode>().is_err());
    }
}
