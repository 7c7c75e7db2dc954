//! Network access.
use std::{fs::File, io::Write, path::Path, time::Duration};

/// Error for a failed network request.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FetchError {
    /// The server answered with a non-success status.
    #[error("{url} returned HTTP status {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// Status code.
        status: u16,
    },

    /// The request could not be sent or the response could not be read.
    #[error("request to {url} failed: {message}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Description from the HTTP client.
        message: String,
    },

    /// Writing the response to disk failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Retrieves remote resources.
pub trait Fetcher {
    /// Returns the body of `url` as text.
    fn fetch_text(&self, url: &str) -> Result<String, FetchError>;

    /// Writes the body of `url` to `destination` and returns the byte count.
    fn fetch_to_file(&self, url: &str, destination: &Path) -> Result<u64, FetchError>;
}

/// [`Fetcher`] backed by a blocking HTTP client with explicit timeouts.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    agent: ureq::Agent,
}

const USER_AGENT: &str = concat!("wingetup/", env!("CARGO_PKG_VERSION"));

impl HttpFetcher {
    /// Creates a client with the given connect and read timeouts.
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout_read(read_timeout)
            .timeout_write(read_timeout)
            .user_agent(USER_AGENT)
            .build();

        Self { agent }
    }

    fn get(&self, url: &str) -> Result<ureq::Response, FetchError> {
        tracing::debug!(url, "http get");

        self.agent
            .get(url)
            .set("Accept", "application/vnd.github+json, */*")
            .call()
            .map_err(|error| match error {
                ureq::Error::Status(status, _) => FetchError::Status {
                    url: url.to_string(),
                    status,
                },
                ureq::Error::Transport(transport) => FetchError::Transport {
                    url: url.to_string(),
                    message: transport.to_string(),
                },
            })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self.get(url)?;

        response.into_string().map_err(|error| FetchError::Transport {
            url: url.to_string(),
            message: error.to_string(),
        })
    }

    fn fetch_to_file(&self, url: &str, destination: &Path) -> Result<u64, FetchError> {
        let response = self.get(url)?;
        let mut reader = response.into_reader();
        let mut file = File::create(destination)?;

        let len = std::io::copy(&mut reader, &mut file)?;
        file.flush()?;

        tracing::debug!(url, ?destination, len, "download complete");

        Ok(len)
    }
}
