//! Bootstraps the `tonic` channel a [`NamedMap`](crate::named_map::NamedMap)
//! talks over. Session/channel setup beyond opening the endpoint -
//! discovery, authentication, reconnection - is out of this crate's
//! scope; callers that need it own the resulting `Channel` and construct
//! a `NamedMap` directly.

use named_cache_proto::named_cache_client::NamedCacheClient;
use thiserror::Error;
use tonic::transport::{Channel, Endpoint};

use crate::config::{ConfigError, SessionConfig};

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("invalid session config: {0}")]
    Config(#[from] ConfigError),
    #[error("unable to connect to socket: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// Opens the `tonic` channel described by a [`SessionConfig`] and returns
/// a generated client ready to hand to `NamedMap::new`.
pub async fn connect(config: &SessionConfig) -> Result<NamedCacheClient<Channel>, ConnectorError> {
    config.validate()?;

    let endpoint = Endpoint::from_shared(config.address.clone())?
        .timeout(config.request_timeout)
        .connect_timeout(config.request_timeout);

    let channel = endpoint.connect().await?;
    Ok(NamedCacheClient::new(channel))
}
