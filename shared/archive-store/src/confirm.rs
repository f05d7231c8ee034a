//! Confirmation prompts guarding destructive operations

use std::io::{self, BufRead, Write};
use tracing::warn;

/// Asks the operator to approve a destructive action.
pub trait ConfirmPrompt: Send + Sync {
    /// Returns true only on an explicit yes.
    fn confirm(&self, message: &str) -> bool;
}

/// Prompts on the terminal until the answer is `y`/`yes` or `n`/`no`.
///
/// End of input, a read error, or a prompt that cannot be shown counts as a
/// refusal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl ConfirmPrompt for TerminalPrompt {
    fn confirm(&self, message: &str) -> bool {
        ask(io::stdin().lock(), io::stdout(), message)
    }
}

fn ask(mut input: impl BufRead, mut output: impl Write, message: &str) -> bool {
    loop {
        if let Err(e) = write!(output, "{} [y/n]: ", message).and_then(|_| output.flush()) {
            warn!("Cannot show confirmation prompt, treating as no: {}", e);
            return false;
        }

        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => return false,
            Ok(_) => {}
        }
        if let Some(answer) = parse_answer(&line) {
            return answer;
        }
    }
}

/// Fixed answer, for scripted runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct PresetAnswer(pub bool);

impl ConfirmPrompt for PresetAnswer {
    fn confirm(&self, _message: &str) -> bool {
        self.0
    }
}

fn parse_answer(line: &str) -> Option<bool> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}
