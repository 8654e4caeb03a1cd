#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("transaction {0} not found")]
    NotFound(i64),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}
