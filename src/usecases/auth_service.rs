//! Drives the login/2FA flow against `AuthPort`, prompting on stdin since
//! this engine runs headless rather than behind a GUI.

use crate::domain::DomainError;
use crate::ports::{AuthPort, SignInResult};
use std::io::Write;
use std::sync::Arc;
use tracing::info;

pub struct AuthService {
    auth: Arc<dyn AuthPort>,
}

impl AuthService {
    pub fn new(auth: Arc<dyn AuthPort>) -> Self {
        Self { auth }
    }

    pub async fn is_authenticated(&self) -> Result<bool, DomainError> {
        self.auth.is_authenticated().await
    }

    /// Runs the full interactive flow: request a login code for `phone`,
    /// prompt for it, and follow up with a 2FA password prompt if the
    /// account requires one.
    pub async fn run_auth_flow(&self, phone: &str) -> Result<(), DomainError> {
        if self.auth.is_authenticated().await? {
            info!("already authenticated, skipping login flow");
            return Ok(());
        }

        self.auth.request_login_code(phone).await?;
        let code = prompt("Enter the login code sent to your Telegram app: ")?;

        match self.auth.sign_in(&code).await? {
            SignInResult::Success => {
                info!("signed in");
                Ok(())
            }
            SignInResult::PasswordRequired { hint } => {
                let prompt_text = match hint {
                    Some(h) => format!("Two-step verification enabled (hint: {h}). Enter password: "),
                    None => "Two-step verification enabled. Enter password: ".to_string(),
                };
                let password = prompt(&prompt_text)?;
                self.auth.check_password(&password).await?;
                info!("signed in with two-step verification");
                Ok(())
            }
        }
    }
}

fn prompt(label: &str) -> Result<String, DomainError> {
    print!("{label}");
    std::io::stdout()
        .flush()
        .map_err(|e| DomainError::Auth(format!("stdout flush: {e}")))?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .map_err(|e| DomainError::Auth(format!("stdin read: {e}")))?;
    Ok(line.trim().to_string())
}
