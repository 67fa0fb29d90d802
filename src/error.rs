use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Malformed source declaration: {0}")]
    SourceInit(String),

    #[error("Malformed repository index: {0}")]
    Format(String),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("Fetch failed for {url}: HTTP {status}")]
    FetchStatus { url: String, status: u16 },

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse XML: {0}")]
    Xml(#[from] serde_xml_rs::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FleetError>;
