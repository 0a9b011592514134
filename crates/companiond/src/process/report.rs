//! Port report printed once the companion is running.
//!
//! The spawning process reads a single JSON line from stdout, for example
//! `{"debugserver_port":10881,"grpc_port":10882}`, to learn where to connect.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use serde_json::{Map, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::ports::ChannelName;

use super::LaunchError;

pub(crate) fn port_report(addresses: &BTreeMap<ChannelName, SocketAddr>) -> Value {
    let ports: Map<String, Value> = addresses
        .iter()
        .map(|(channel, address)| (format!("{channel}_port"), Value::from(address.port())))
        .collect();
    Value::Object(ports)
}

pub(crate) async fn write_port_report<W: AsyncWrite + Unpin>(
    writer: &mut W,
    addresses: &BTreeMap<ChannelName, SocketAddr>,
) -> Result<(), LaunchError> {
    let mut line = serde_json::to_vec(&port_report(addresses))?;
    line.push(b'\n');
    writer
        .write_all(&line)
        .await
        .map_err(|source| LaunchError::Report { source })?;
    writer
        .flush()
        .await
        .map_err(|source| LaunchError::Report { source })
}
