//! Failure signatures: short, stable strings compared across iterations to
//! detect a stall. Identical output always yields an identical signature.

use sha2::{Digest, Sha256};

/// A command outlived its timeout and was killed.
pub const TIMEOUT: &str = "TIMEOUT";

/// A command could not be started at all.
pub const SPAWN_FAILED: &str = "SPAWN_FAILED";

const EMPTY_OUTPUT: &str = "EMPTY_OUTPUT";
const LINE_PREFIX_CHARS: usize = 50;
const HASH_TAIL_LINES: usize = 5;
const HASH_HEX_CHARS: usize = 12;

/// Derive a signature from a failing command's output.
///
/// Lines are scanned from the end; the first recognizable one wins, checked
/// in order: a `FAILED` prefix, then "error", "exception" and "traceback"
/// anywhere (case-insensitive). Otherwise the last few lines are hashed.
pub fn failure_signature(output: &str) -> String {
    if output.is_empty() {
        return EMPTY_OUTPUT.into();
    }

    for line in output.lines().rev() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_lowercase();
        if line.starts_with("FAILED") {
            return format!("FAILED:{}", prefix(line));
        }
        if lower.contains("error") {
            return format!("ERROR:{}", prefix(line));
        }
        if lower.contains("exception") {
            return format!("EXCEPTION:{}", prefix(line));
        }
        if lower.contains("traceback") {
            return "TRACEBACK".into();
        }
    }

    let lines: Vec<&str> = output.lines().collect();
    let tail = lines[lines.len().saturating_sub(HASH_TAIL_LINES)..].join("\n");
    let digest = format!("{:x}", Sha256::digest(tail.as_bytes()));
    format!("HASH:{}", &digest[..HASH_HEX_CHARS])
}

fn prefix(line: &str) -> String {
    line.chars().take(LINE_PREFIX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_output() {
        assert_eq!(failure_signature(""), "EMPTY_OUTPUT");
    }

    #[test]
    fn last_error_line_wins() {
        let out = "compiling\nerror[E0308]: mismatched types\n  --> src/main.rs:2:5\nerror: could not compile `demo`\n";
        assert_eq!(failure_signature(out), "ERROR:error: could not compile `demo`");
    }

    #[test]
    fn failed_prefix_outranks_error_on_the_same_line() {
        let out = "FAILED tests/test_x.py::test_a - AssertionError: boom";
        assert_eq!(
            failure_signature(out),
            "FAILED:FAILED tests/test_x.py::test_a - AssertionError: b"
        );
    }

    #[test]
    fn exception_and_traceback() {
        assert_eq!(
            failure_signature("Exception in thread main\n"),
            "EXCEPTION:Exception in thread main"
        );
        assert_eq!(
            failure_signature("Traceback (most recent call last):\n  File \"x.py\""),
            "TRACEBACK"
        );
    }

    #[test]
    fn line_is_clipped_to_fifty_chars() {
        let line = format!("error: {}", "x".repeat(100));
        let sig = failure_signature(&line);
        assert_eq!(sig.len(), "ERROR:".len() + 50);
    }

    #[test]
    fn hash_fallback_is_stable_and_short() {
        let out = "1\n2\n3\n4\n5\n6\n";
        let a = failure_signature(out);
        let b = failure_signature(out);
        assert_eq!(a, b);
        assert!(a.starts_with("HASH:"));
        assert_eq!(a.len(), "HASH:".len() + 12);
        // Only the last five lines matter
        assert_eq!(a, failure_signature("0\n2\n3\n4\n5\n6\n"));
        assert_ne!(a, failure_signature("1\n2\n3\n4\n5\n7\n"));
    }

    #[test]
    fn whitespace_only_output_hashes() {
        assert!(failure_signature("   \n\n").starts_with("HASH:"));
    }
}
