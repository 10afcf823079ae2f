//! Tunables of the peer sessions and of the piece tracker.
//!
//! Every key is optional in the TOML file, missing keys take the defaults
//! of [`Config::default`].
use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{error::Error, tcp_wire::MAX_MESSAGE_SIZE};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Pause of the request scheduler between two iterations.
    pub request_interval_ms: u64,

    /// How long a session waits for the next frame before giving up on the
    /// peer.
    pub read_timeout_secs: u64,

    /// How long a session waits for the remote handshake.
    pub handshake_timeout_secs: u64,

    /// After this long without an answer, a requested piece can be requested
    /// again, from any peer.
    pub request_timeout_secs: u64,

    /// Capacity of the queue of outgoing messages of each session.
    pub outgoing_queue_len: usize,

    /// Largest length prefix accepted from a peer.
    pub max_message_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_interval_ms: 5,
            read_timeout_secs: 120,
            handshake_timeout_secs: 10,
            request_timeout_secs: 15,
            outgoing_queue_len: 100,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl Config {
    pub fn from_toml(s: &str) -> Result<Self, Error> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration file and transform it into Self.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let s = fs::read_to_string(path).await?;
        Self::from_toml(&s)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.outgoing_queue_len == 0 {
            return Err(Error::ConfigError(
                "outgoing_queue_len cannot be zero".into(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(Error::ConfigError(
                "max_message_size cannot be zero".into(),
            ));
        }
        Ok(())
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
