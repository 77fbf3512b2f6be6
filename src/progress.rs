//! Batch ingestion progress reporting.
//!
//! `kh ingest` reports one notification per file as `(current, total,
//! message)`. Progress goes to **stderr** so stdout stays parseable for
//! scripts. Any `Fn(usize, usize, &str)` closure is also a reporter, which
//! is what library callers and tests usually pass.

use std::io::Write;

/// Receives per-file progress from batch ingestion.
pub trait ProgressReporter: Send + Sync {
    /// `current` is 1-based; `total` is the number of files in the batch.
    fn report(&self, current: usize, total: usize, message: &str);
}

impl<F> ProgressReporter for F
where
    F: Fn(usize, usize, &str) + Send + Sync,
{
    fn report(&self, current: usize, total: usize, message: &str) {
        self(current, total, message)
    }
}

/// Human-friendly progress on stderr: "ingest  3 / 12  manual.pptx".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, current: usize, total: usize, message: &str) {
        let line = format!(
            "ingest  {} / {}  {}\n",
            format_number(current as u64),
            format_number(total as u64),
            message
        );
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, current: usize, total: usize, message: &str) {
        let obj = serde_json::json!({
            "event": "progress",
            "current": current,
            "total": total,
            "message": message,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _current: usize, _total: usize, _message: &str) {}
}

/// `1234567` → `"1,234,567"`.
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "off" | "none" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => anyhow::bail!("Unknown progress mode: {}. Use off, human, or json.", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn closures_are_reporters() {
        let seen = Mutex::new(Vec::new());
        let reporter = |current: usize, total: usize, message: &str| {
            seen.lock().unwrap().push(format!("{}/{} {}", current, total, message));
        };
        reporter.report(1, 2, "a.md");
        reporter.report(2, 2, "b.md");
        assert_eq!(*seen.lock().unwrap(), vec!["1/2 a.md", "2/2 b.md"]);
    }

    #[test]
    fn parses_modes() {
        assert_eq!("json".parse::<ProgressMode>().unwrap(), ProgressMode::Json);
        assert!("loud".parse::<ProgressMode>().is_err());
    }
}
