//! Append-only deployment log with secret redaction.
//!
//! Opens the primary path (typically under `/var/log`) and falls back to a
//! working-directory file when that is not writable. Once open, writes
//! never fail the deployment; a broken log is worth less than a broken
//! rollout.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct LogSink {
    file: Mutex<Option<File>>,
    path: PathBuf,
}

impl LogSink {
    pub fn open(primary: &Path, fallback: &Path) -> LogSink {
        for path in [primary, fallback] {
            if let Ok(file) = OpenOptions::new().create(true).append(true).open(path) {
                if path != primary {
                    tracing::warn!(
                        primary = %primary.display(),
                        fallback = %path.display(),
                        "log path not writable, using fallback"
                    );
                }
                return LogSink { file: Mutex::new(Some(file)), path: path.to_owned() };
            }
        }
        tracing::warn!(primary = %primary.display(), "no writable log path, logging to console only");
        LogSink { file: Mutex::new(None), path: primary.to_owned() }
    }

    /// Sink that drops everything, for tests and `plan` runs.
    pub fn disabled() -> LogSink {
        LogSink { file: Mutex::new(None), path: PathBuf::new() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one redacted, timestamped line. Write failures are ignored.
    pub fn line(&self, text: &str) {
        let Ok(mut guard) = self.file.lock() else {
            return;
        };
        if let Some(file) = guard.as_mut() {
            let _ = writeln!(file, "{} {}", utc_timestamp(), redact(text));
        }
    }
}

/// Mask token values in command lines and headers before they reach disk.
/// Covers `Bearer <token>`, `token:<value>` basic-auth material and
/// `--auth-token <value>` style flags.
pub fn redact(line: &str) -> String {
    let mut out = line.to_owned();
    for marker in ["bearer ", "--auth-token ", "--auth-token=", "x-api-key:"] {
        out = mask_after(&out, marker);
    }
    out
}

fn mask_after(line: &str, marker: &str) -> String {
    let lower = line.to_ascii_lowercase();
    let mut out = String::with_capacity(line.len());
    let mut cursor = 0;
    while let Some(found) = lower[cursor..].find(marker) {
        let value_start = cursor + found + marker.len();
        out.push_str(&line[cursor..value_start]);
        let rest = &line[value_start..];
        let value_len = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '"' | '\''))
            .unwrap_or(rest.len());
        if value_len > 0 {
            out.push_str("****");
        }
        cursor = value_start + value_len;
    }
    out.push_str(&line[cursor..]);
    out
}

/// `YYYY-MM-DDTHH:MM:SSZ` from the system clock, no clock crate needed.
fn utc_timestamp() -> String {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days as i64);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}Z",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

// Howard Hinnant's civil-from-days algorithm.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}
