#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("failed to connect to smarthost {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("smarthost {host} rejected the message: {detail}")]
    Rejected { host: String, detail: String },
    #[error("i/o error talking to smarthost {host}: {source}")]
    Io {
        host: String,
        #[source]
        source: std::io::Error,
    },
}
