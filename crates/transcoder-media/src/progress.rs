//! FFmpeg progress parsing.
//!
//! Two independent, best-effort line extractors:
//! - stdout carries `-progress -` key/value lines; `out_time_ms=N` holds the
//!   output position in microseconds (ffmpeg's naming, not milliseconds).
//! - stderr carries the input banner, whose `Duration: HH:MM:SS.ff,` line gives
//!   the total length.
//!
//! Nothing here returns an error; unparseable lines are simply skipped.

use std::sync::OnceLock;

use regex::Regex;

/// Structured value extracted from one output line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressUpdate {
    /// Seconds of output written so far
    CurrentTime(f64),
    /// Total input duration in seconds
    TotalDuration(f64),
}

fn out_time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"out_time_ms=(\d+)").expect("out_time regex is valid"))
}

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Duration:\s*([0-9:.]+),").expect("duration regex is valid"))
}

fn timecode_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+):(\d+):(\d+(?:\.\d+)?)$").expect("timecode regex is valid"))
}

/// Parse a line of process stdout.
pub fn parse_stdout_line(line: &str) -> Option<ProgressUpdate> {
    let caps = out_time_regex().captures(line)?;
    let micros: u64 = caps.get(1)?.as_str().parse().ok()?;
    Some(ProgressUpdate::CurrentTime(micros as f64 / 1_000_000.0))
}

/// Parse a line of process stderr.
///
/// A malformed or zero timecode yields `None` so the previous value stands.
pub fn parse_stderr_line(line: &str) -> Option<ProgressUpdate> {
    let caps = duration_regex().captures(line)?;
    let seconds = parse_timecode(caps.get(1)?.as_str());
    if seconds > 0.0 {
        Some(ProgressUpdate::TotalDuration(seconds))
    } else {
        None
    }
}

/// Convert an `H:MM:SS(.ff)` timecode to seconds.
///
/// Returns 0 for anything that is not exactly three numeric segments.
pub fn parse_timecode(timecode: &str) -> f64 {
    let Some(caps) = timecode_regex().captures(timecode) else {
        return 0.0;
    };
    let segment = |i: usize| -> Option<f64> { caps.get(i)?.as_str().parse::<f64>().ok() };
    match (segment(1), segment(2), segment(3)) {
        (Some(hours), Some(minutes), Some(seconds)) => hours * 3600.0 + minutes * 60.0 + seconds,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_out_time_line() {
        assert_eq!(
            parse_stdout_line("out_time_ms=5000000"),
            Some(ProgressUpdate::CurrentTime(5.0))
        );
        assert_eq!(parse_stdout_line("frame=120"), None);
        assert_eq!(parse_stdout_line("out_time_ms=N/A"), None);
    }

    #[test]
    fn test_duration_line() {
        match parse_stderr_line("  Duration: 00:02:15.77,  start: 0.000000, bitrate: 1205 kb/s") {
            Some(ProgressUpdate::TotalDuration(d)) => assert!(approx(d, 135.77)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(parse_stderr_line("  Duration: N/A, start: 0.000000"), None);
        assert_eq!(parse_stderr_line("  Duration: 12:34, start: 0"), None);
        assert_eq!(parse_stderr_line("Stream #0:0: Video: h264"), None);
    }

    #[test]
    fn test_timecode() {
        assert!(approx(parse_timecode("00:02:15.77"), 135.77));
        assert!(approx(parse_timecode("1:00:00"), 3600.0));
        assert!(approx(parse_timecode("10:30:05.5"), 37805.5));
    }

    #[test]
    fn test_malformed_timecode() {
        for bad in ["", "12:34", "1:2:3:4", "a:b:c", "00:00.5:10", "1:2:3.", "::", "1:2:3.4.5"] {
            assert_eq!(parse_timecode(bad), 0.0, "{:?}", bad);
        }
    }
}
