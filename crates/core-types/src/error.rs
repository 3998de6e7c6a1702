use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Column '{0}' is not present in the row")]
    MissingColumn(String),

    #[error("Failed to decode row into {target}: {source}")]
    Decode {
        target: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
