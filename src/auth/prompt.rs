// ABOUTME: Interactive secret prompting for passphrases and PINs.
// ABOUTME: Terminal prompts use dialoguer; non-interactive runs refuse to prompt.

use super::CredentialError;
use dialoguer::Password;
use std::io::IsTerminal;
use std::sync::Arc;

/// Blocking prompt for a secret value. Called from a blocking task.
pub trait Prompter: Send + Sync {
    fn prompt_secret(&self, message: &str) -> Result<String, CredentialError>;
}

pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn prompt_secret(&self, message: &str) -> Result<String, CredentialError> {
        Password::new()
            .with_prompt(message)
            .allow_empty_password(true)
            .interact()
            .map_err(|e| CredentialError::Prompt(e.to_string()))
    }
}

pub struct NoPrompt;

impl Prompter for NoPrompt {
    fn prompt_secret(&self, message: &str) -> Result<String, CredentialError> {
        Err(CredentialError::Prompt(format!(
            "{message} (no terminal available for prompting)"
        )))
    }
}

/// Terminal prompter when stdin is a terminal, otherwise one that always fails.
pub fn default_prompter() -> Arc<dyn Prompter> {
    if std::io::stdin().is_terminal() {
        Arc::new(TerminalPrompter)
    } else {
        Arc::new(NoPrompt)
    }
}
