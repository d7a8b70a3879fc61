use std::path::PathBuf;
use url::Url;

/// Why a conversion did not produce a PDF. Every variant is terminal.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Input file not found: {}", path.display())]
    InputNotFound { path: PathBuf },

    #[error("Failed to launch the browser")]
    EngineLaunch(#[source] anyhow::Error),

    #[error("Failed to load {url}")]
    Navigation {
        url: Url,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to render the PDF")]
    Render(#[source] anyhow::Error),

    #[error("Failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
