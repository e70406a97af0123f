//! Listener acquisition seam
//!
//! The core never opens listening sockets itself: it asks a [`Binder`].
//! In production that can be a client of a privileged socket-lending
//! helper; [`DirectBinder`] simply binds in-process, which is what the
//! gateway binary and the tests use.

use std::io;
use std::net::SocketAddr;
use std::path::Path;

use async_trait::async_trait;
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;

/// Lends listening sockets to the ingestion core
#[async_trait]
pub trait Binder: Send + Sync {
    /// Obtain a TCP listener bound to `addr`
    async fn listen(&self, addr: SocketAddr) -> io::Result<TcpListener>;

    /// Obtain a unix stream listener bound to `path`
    #[cfg(unix)]
    async fn bind_unix(&self, path: &Path) -> io::Result<UnixListener>;
}

/// Binder that binds sockets directly in this process
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectBinder;

#[async_trait]
impl Binder for DirectBinder {
    async fn listen(&self, addr: SocketAddr) -> io::Result<TcpListener> {
        TcpListener::bind(addr).await
    }

    #[cfg(unix)]
    async fn bind_unix(&self, path: &Path) -> io::Result<UnixListener> {
        // A stale socket file from a previous run would fail the bind
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        UnixListener::bind(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_direct_binder_tcp() {
        let listener = DirectBinder
            .listen("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_direct_binder_unix_replaces_stale_socket() {
        let dir = std::env::temp_dir().join(format!("spigot-binder-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("relp.sock");

        let first = DirectBinder.bind_unix(&path).await.unwrap();
        drop(first);
        // The socket file is still on disk; a rebind must succeed anyway
        let _second = DirectBinder.bind_unix(&path).await.unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
