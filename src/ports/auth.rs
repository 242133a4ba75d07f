//! Login collaborator contract: a CLI needs a concrete login flow to reach
//! the point where the core subsystems can run.

use crate::domain::DomainError;

#[derive(Debug, Clone)]
pub enum SignInResult {
    Success,
    PasswordRequired { hint: Option<String> },
}

#[async_trait::async_trait]
pub trait AuthPort: Send + Sync {
    async fn is_authenticated(&self) -> Result<bool, DomainError>;
    async fn request_login_code(&self, phone: &str) -> Result<(), DomainError>;
    async fn sign_in(&self, code: &str) -> Result<SignInResult, DomainError>;
    async fn check_password(&self, password: &str) -> Result<(), DomainError>;
}
