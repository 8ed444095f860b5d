use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
}

#[derive(Debug, Display, Error)]
pub enum ExchangeError {
    #[display("failed to connect to {endpoint}")]
    Connection { endpoint: String },
    #[display("request to {endpoint} failed")]
    Request { endpoint: String },
    #[display("failed to parse response from {endpoint}")]
    ResponseParse { endpoint: String },
}

#[derive(Debug, Display, Error)]
pub enum StorageError {
    #[display("database migration failed")]
    Migration,
    #[display("failed to insert data")]
    Insert,
    #[display("failed to query data")]
    Query,
}

#[derive(Debug, Display, Error)]
pub enum NotifierError {
    #[display("failed to deliver notification")]
    Send,
}
