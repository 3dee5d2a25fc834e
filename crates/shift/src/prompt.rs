//! Interactive confirmation backed by dialoguer.

use dialoguer::Confirm;
use shift_core::{Error, Prompt};

/// Asks on the terminal, defaulting to "no"
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn confirm(&self, message: &str) -> shift_core::Result<bool> {
        Confirm::new()
            .with_prompt(message)
            .default(false)
            .interact()
            .map_err(|e| Error::Other(format!("confirmation prompt failed: {e}")))
    }
}
