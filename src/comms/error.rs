//! Transport error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommsError {
    #[error("Failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("Failed to open serial port {port}: {source}")]
    Serial {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("Link is closed")]
    Closed,

    #[error("Outbound queue is full")]
    QueueFull,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
