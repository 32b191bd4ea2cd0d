pub mod bus;
pub mod chains;
pub mod codec;
pub mod compose;
pub mod config;
pub mod listener;
pub mod node;
pub mod relayer;
pub mod submitter;
pub mod types;

pub use bus::{BusFactory, BusKey, TxBus};
pub use compose::PolyComposer;
pub use config::Config;
pub use listener::Listener;
pub use relayer::Server;
pub use submitter::Submitter;
pub use types::{Account, MakeTxParam, PolyHeader, Tx, TxType};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The message can never be delivered as is; retrying it is pointless.
    #[error("Invalid tx: {0}")]
    InvalidTx(String),

    #[error("Bus error: {0}")]
    Bus(String),
}

impl Error {
    pub fn is_invalid_tx(&self) -> bool {
        matches!(self, Error::InvalidTx(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.to_string())
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Bus(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
