//! Classification of the media engine's diagnostic output.
//!
//! ffmpeg reports every failure as a non-zero exit plus free-form stderr.
//! The supervisor needs to know one thing: would re-encoding help? Known
//! rejection messages (codec/container/parameter incompatibilities) map to
//! [`cf_core::Error::EngineRejected`]; environmental failures (missing files,
//! full disks) map to [`cf_core::Error::EngineFailed`].

use std::sync::LazyLock;

use regex::{Regex, RegexSet};

use crate::command::ToolOutput;

/// Messages ffmpeg prints when the requested stream parameters cannot be
/// honoured as-is. Re-encoding is expected to get past all of them.
static REJECTION_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)could not find tag for codec",
        r"(?i)not currently supported in container",
        r"(?i)codec not currently supported",
        r"(?i)tag \S+ incompatible with output codec",
        r"(?i)invalid data found when processing input",
        r"(?i)codec frame size is not set",
        r"(?i)non-monoton(ous|ic) dts",
        r"(?i)error while opening encoder",
        r"(?i)error initializing output stream",
        r"(?i)could not write header",
        r"(?i)incompatible pixel format",
        r"(?i)specified sample rate \d+ is not supported",
        r"(?i)bitstream filter .* (failed|not found)",
    ])
    .unwrap_or_else(|_| RegexSet::empty())
});

/// Failures that no change of strategy can fix.
static FATAL_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)no such file or directory",
        r"(?i)permission denied",
        r"(?i)no space left on device",
        r"(?i)cannot allocate memory|out of memory",
        r"(?i)read-only file system",
    ])
    .unwrap_or_else(|_| RegexSet::empty())
});

static ERROR_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)(error|invalid|could not|cannot|not supported|failed|incompatible|unable)").ok()
});

/// Turn a failed engine run into a classified error.
///
/// `speculative` marks a stream-copy attempt: any unexplained failure there
/// is attributed to the copy shortcut and reported as rejected.
pub fn classify_failure(tool: &str, output: &ToolOutput, speculative: bool) -> cf_core::Error {
    let stderr = output.stderr.trim().to_string();
    let message = summary_line(&stderr).unwrap_or_else(|| match output.code {
        Some(code) => format!("exited with status {code}"),
        None => "terminated by signal".to_string(),
    });

    let rejected = if FATAL_PATTERNS.is_match(&stderr) {
        false
    } else {
        REJECTION_PATTERNS.is_match(&stderr) || speculative
    };

    tracing::debug!(tool, rejected, speculative, message = %message, "classified engine failure");

    if rejected {
        cf_core::Error::EngineRejected {
            tool: tool.to_string(),
            message,
            stderr,
        }
    } else {
        cf_core::Error::EngineFailed {
            tool: tool.to_string(),
            message,
            stderr,
        }
    }
}

/// The most informative line of engine stderr: the last line that looks like
/// an error, or the last non-empty line.
pub fn summary_line(stderr: &str) -> Option<String> {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let errorish = ERROR_LINE
        .as_ref()
        .and_then(|re| lines.iter().rev().find(|l| re.is_match(l)));

    errorish.or_else(|| lines.last()).map(|l| l.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_core::ErrorKind;

    fn failed(stderr: &str) -> ToolOutput {
        ToolOutput {
            code: Some(1),
            stderr: stderr.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn container_tag_error_is_rejected() {
        let out = failed(
            "[mp4 @ 0x55] Could not find tag for codec pcm_s16le in stream #1, \
             codec not currently supported in container\n\
             Could not write header for output file #0 (incorrect codec parameters ?): Invalid argument\n",
        );
        let err = classify_failure("ffmpeg", &out, false);
        assert_eq!(err.kind(), ErrorKind::EngineRejected);
        assert!(err.to_string().contains("Could not write header"));
        assert!(err.stderr().unwrap().contains("pcm_s16le"));
    }

    #[test]
    fn unknown_failure_depends_on_mode() {
        let out = failed("something odd happened\n");
        assert_eq!(classify_failure("ffmpeg", &out, true).kind(), ErrorKind::EngineRejected);
        assert_eq!(classify_failure("ffmpeg", &out, false).kind(), ErrorKind::EngineFailed);
    }

    #[test]
    fn fatal_patterns_win_even_when_speculative() {
        let out = failed("/out/final.mp4: No space left on device\n");
        assert_eq!(classify_failure("ffmpeg", &out, true).kind(), ErrorKind::EngineFailed);
    }

    #[test]
    fn summary_prefers_error_lines() {
        let stderr = "Input #0, matroska\n  Stream #0:0: Video: h264\nError while opening encoder for output stream #0:0\nConversion failed!\n";
        assert_eq!(summary_line(stderr).as_deref(), Some("Conversion failed!"));
        assert_eq!(summary_line("just info\n").as_deref(), Some("just info"));
        assert_eq!(summary_line("\n\n"), None);
    }

    #[test]
    fn empty_stderr_reports_exit_code() {
        let out = ToolOutput {
            code: Some(69),
            ..Default::default()
        };
        let err = classify_failure("ffmpeg", &out, false);
        assert!(err.to_string().contains("exited with status 69"));
    }
}
