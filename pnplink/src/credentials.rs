use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::cli::Cli;
use crate::remote::Credentials;
use crate::util::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{what} not found at {path}")]
    Missing { what: &'static str, path: String },
}

/// Read the TLS material from the storage dir
pub async fn load(cli: &Cli, store: &Store) -> Result<Credentials, CredentialsError> {
    let root_ca = read(store, &cli.root_ca, "root CA").await?;
    let client_cert = read(store, &cli.client_cert, "device certificate").await?;
    let private_key = read(store, &cli.private_key, "device private key").await?;

    Ok(Credentials {
        root_ca,
        client_cert: Some(client_cert),
        private_key: Some(private_key),
        alpn: cli.alpn.clone(),
        disable_sni: cli.disable_sni,
    })
}

async fn read(store: &Store, path: &Path, what: &'static str) -> Result<Vec<u8>, CredentialsError> {
    debug!("loading {what} from {}", path.display());
    store
        .read_file(path)
        .await?
        .ok_or_else(|| CredentialsError::Missing {
            what,
            path: path.display().to_string(),
        })
}
