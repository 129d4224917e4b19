use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid simulator setting: {0}")]
    InvalidConfig(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
