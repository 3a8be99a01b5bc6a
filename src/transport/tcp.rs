//! TCP connect with a deadline.

use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{DriverError, Result};

/// Open a TCP connection to `host:port`, giving up after `timeout`.
///
/// Nagle is disabled: requests are small and latency bound.
pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let address = format!("{host}:{port}");
    let stream = tokio::time::timeout(timeout, TcpStream::connect(&address))
        .await
        .map_err(|_| DriverError::Timeout(timeout))??;
    stream.set_nodelay(true)?;

    tracing::debug!(address = %address, "established connection");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_sets_nodelay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let stream = connect("127.0.0.1", port, Duration::from_secs(5)).await.unwrap();
        accept.await.unwrap();

        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect("127.0.0.1", port, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, DriverError::Io(_)));
    }
}
