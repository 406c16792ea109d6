use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid node label: {0}")]
    InvalidLabel(String),

    #[error("Invalid relationship type: {0}")]
    InvalidRelationType(String),

    #[error("Invalid input kind: {0}")]
    InvalidInputKind(String),
}

pub type Result<T> = std::result::Result<T, Error>;
