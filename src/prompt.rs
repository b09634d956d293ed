//! Asking the operator before repairing.

use std::io::{self, BufRead, Write};
use tracing::info;

/// Decides whether a repair goes ahead.
///
/// `preset` is the session-wide automatic answer (`--yes`/`--no`), when there is one.
pub trait Ask {
    fn ask_for_repair(&mut self, message: &str, preset: Option<bool>) -> bool;
}

/// Closures make convenient one-off askers, e.g. `|_: &str, _| false`.
impl<F> Ask for F
where
    F: FnMut(&str, Option<bool>) -> bool,
{
    fn ask_for_repair(&mut self, message: &str, preset: Option<bool>) -> bool {
        self(message, preset)
    }
}

/// Agrees to everything without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct Batch;

impl Ask for Batch {
    fn ask_for_repair(&mut self, _message: &str, _preset: Option<bool>) -> bool {
        true
    }
}

/// Asks on the controlling terminal, unless an answer is preset.
#[derive(Debug, Default)]
pub struct Terminal;

impl Terminal {
    fn read_answer(input: &mut impl BufRead) -> io::Result<Option<bool>> {
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(parse_answer(&line)))
    }
}

/// Empty answers default to yes.
fn parse_answer(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "" | "y" | "yes")
}

impl Ask for Terminal {
    fn ask_for_repair(&mut self, message: &str, preset: Option<bool>) -> bool {
        if let Some(answer) = preset {
            info!("{} {}", message, if answer { "[yes]" } else { "[no]" });
            return answer;
        }
        let mut stderr = io::stderr().lock();
        if write!(stderr, "{} [Y/n] ", message).and_then(|_| stderr.flush()).is_err() {
            return false;
        }
        // EOF or unreadable terminal: nothing gets repaired behind the operator's back
        Terminal::read_answer(&mut io::stdin().lock())
            .ok()
            .flatten()
            .unwrap_or(false)
    }
}
