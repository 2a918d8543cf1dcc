//! Output sink for the `print` builtin
//!
//! Printed lines go to stdout unless the current thread is inside
//! [`with_output_capture`], in which case they are collected in memory.
//! Tests and embedders use the capture to assert on program output.

use std::cell::RefCell;
use std::io::Write;

thread_local! {
    static CAPTURE: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

/// Lines printed while a capture was active
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputCapture {
    /// One entry per `print` call
    pub stdout: Vec<String>,
}

/// Run `f` with print output captured instead of written to stdout
///
/// Captures nest: an inner capture collects only its own lines, and the
/// outer capture resumes afterwards.
pub fn with_output_capture<F, R>(f: F) -> (R, OutputCapture)
where
    F: FnOnce() -> R,
{
    let outer = CAPTURE.with(|cell| cell.borrow_mut().replace(Vec::new()));

    let result = f();

    let stdout = CAPTURE.with(|cell| {
        let mut slot = cell.borrow_mut();
        let lines = slot.take().unwrap_or_default();
        *slot = outer;
        lines
    });

    (result, OutputCapture { stdout })
}

/// Emit one printed line
pub(crate) fn print_line(text: &str) {
    let captured = CAPTURE.with(|cell| match cell.borrow_mut().as_mut() {
        Some(lines) => {
            lines.push(text.to_string());
            true
        }
        None => false,
    });

    if !captured {
        let mut stdout = std::io::stdout().lock();
        // A closed stdout is not a program error
        let _ = writeln!(stdout, "{text}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_collects_lines() {
        let ((), output) = with_output_capture(|| {
            print_line("Line 1");
            print_line("Line 2");
        });

        assert_eq!(output.stdout, vec!["Line 1", "Line 2"]);
    }

    #[test]
    fn nested_captures_are_separate() {
        let (inner, outer) = with_output_capture(|| {
            print_line("outer");
            let ((), inner) = with_output_capture(|| print_line("inner"));
            print_line("outer again");
            inner
        });

        assert_eq!(inner.stdout, vec!["inner"]);
        assert_eq!(outer.stdout, vec!["outer", "outer again"]);
    }
}
