//! Helpers shared by the integration tests

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use rosetta_op_types::{Configuration, NetworkIdentifier, MAINNET_CHAIN_ID};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Offline mainnet configuration listening on an ephemeral loopback port
pub fn offline_config() -> Configuration {
    let mut config = Configuration::offline(NetworkIdentifier::mainnet(), MAINNET_CHAIN_ID, 0);
    config.listen_addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config
}

pub fn request_bytes(method: &str, path: &str, body: Option<&str>) -> Vec<u8> {
    let body = body.unwrap_or("");
    format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

/// Sends one request and reads until the server closes the connection.
pub async fn http_request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> std::io::Result<String> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(&request_bytes(method, path, body)).await?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    Ok(String::from_utf8_lossy(&response).into_owned())
}
