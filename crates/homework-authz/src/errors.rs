use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("policy engine error: {0}")]
    Engine(#[from] casbin::Error),
    #[error("invalid policy rule: {0}")]
    InvalidRule(String),
    #[error("policy engine unavailable: {0}")]
    Unavailable(String),
}

pub type AuthzResult<T> = Result<T, AuthzError>;
