//! RELP frame splitter
//!
//! Wire format: `TXNR SP COMMAND SP DATALEN (SP DATA)? LF`. TXNR is a
//! non-negative decimal, DATALEN the exact byte length of DATA, and DATA
//! may contain anything including LF - only the declared length delimits
//! it. A maximum frame size bounds memory against hostile peers.
//!
//! Payload bytes land in a buffer from the shared [`BufferPool`]; the
//! consumer of the frame gives it back.

use std::io;

use bytes::BytesMut;
use spigot_queue::BufferPool;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Longest accepted COMMAND token
const MAX_COMMAND_LEN: usize = 16;

/// Errors while reading one frame
#[derive(Debug, Error)]
pub enum SplitError {
    /// The transport failed
    #[error("i/o error reading frame: {0}")]
    Io(#[from] io::Error),

    /// The frame violates the RELP grammar
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    /// The client used a command this server does not speak
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// The declared DATALEN exceeds the frame size bound
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    Oversized {
        /// Declared payload size
        size: usize,
        /// Configured bound
        limit: usize,
    },
}

/// The three commands of the RELP dialect this server speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelpCommand {
    /// Session negotiation; must come first, exactly once
    Open,
    /// Orderly session end
    Close,
    /// One log message
    Syslog,
}

impl RelpCommand {
    /// Command token as it appears on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            RelpCommand::Open => "open",
            RelpCommand::Close => "close",
            RelpCommand::Syslog => "syslog",
        }
    }
}

/// One decoded frame
#[derive(Debug)]
pub struct RelpFrame {
    /// Transaction number
    pub txnr: u64,
    /// Command
    pub command: RelpCommand,
    /// Payload; pooled when non-empty
    pub data: BytesMut,
}

/// Read one byte, mapping clean EOF to `None`
async fn read_byte<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<u8>> {
    match reader.read_u8().await {
        Ok(b) => Ok(Some(b)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// Read one RELP frame
///
/// Returns `Ok(None)` on EOF at a frame boundary; EOF anywhere inside a
/// frame is malformed. `max_size` bounds the declared DATALEN.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_size: usize,
    pool: &BufferPool,
) -> Result<Option<RelpFrame>, SplitError> {
    // TXNR
    let mut txnr: u64 = 0;
    let mut digits = 0usize;
    loop {
        let Some(byte) = read_byte(reader).await? else {
            return if digits == 0 {
                Ok(None)
            } else {
                Err(SplitError::Malformed("eof inside txnr"))
            };
        };
        match byte {
            b'0'..=b'9' => {
                txnr = txnr
                    .checked_mul(10)
                    .and_then(|t| t.checked_add(u64::from(byte - b'0')))
                    .ok_or(SplitError::Malformed("txnr overflows"))?;
                digits += 1;
            }
            b' ' if digits > 0 => break,
            _ => return Err(SplitError::Malformed("txnr is not a number")),
        }
    }

    // COMMAND
    let mut token = [0u8; MAX_COMMAND_LEN];
    let mut len = 0usize;
    loop {
        let Some(byte) = read_byte(reader).await? else {
            return Err(SplitError::Malformed("eof inside command"));
        };
        match byte {
            b' ' if len > 0 => break,
            b'a'..=b'z' if len < MAX_COMMAND_LEN => {
                token[len] = byte;
                len += 1;
            }
            _ => return Err(SplitError::Malformed("invalid command token")),
        }
    }
    let command = match &token[..len] {
        b"open" => RelpCommand::Open,
        b"close" => RelpCommand::Close,
        b"syslog" => RelpCommand::Syslog,
        other => {
            return Err(SplitError::UnknownCommand(
                String::from_utf8_lossy(other).into_owned(),
            ))
        }
    };

    // DATALEN, terminated by SP (data follows) or LF (no data)
    let mut datalen: usize = 0;
    let mut digits = 0usize;
    let mut data_follows = false;
    loop {
        let Some(byte) = read_byte(reader).await? else {
            return Err(SplitError::Malformed("eof inside datalen"));
        };
        match byte {
            b'0'..=b'9' => {
                datalen = datalen
                    .checked_mul(10)
                    .and_then(|d| d.checked_add(usize::from(byte - b'0')))
                    .ok_or(SplitError::Malformed("datalen overflows"))?;
                digits += 1;
            }
            b' ' if digits > 0 => {
                data_follows = true;
                break;
            }
            b'\n' if digits > 0 => break,
            _ => return Err(SplitError::Malformed("datalen is not a number")),
        }
    }

    if !data_follows {
        if datalen != 0 {
            return Err(SplitError::Malformed("datalen is non-zero but no data follows"));
        }
        return Ok(Some(RelpFrame {
            txnr,
            command,
            data: BytesMut::new(),
        }));
    }

    if datalen > max_size {
        return Err(SplitError::Oversized {
            size: datalen,
            limit: max_size,
        });
    }

    // DATA: exactly DATALEN bytes, LF included if the client sent one
    let mut data = if datalen > 0 {
        pool.acquire()
    } else {
        BytesMut::new()
    };
    data.resize(datalen, 0);
    if let Err(e) = reader.read_exact(&mut data[..]).await {
        pool.release(data);
        return if e.kind() == io::ErrorKind::UnexpectedEof {
            Err(SplitError::Malformed("eof inside data"))
        } else {
            Err(e.into())
        };
    }

    // TRAILER
    match read_byte(reader).await? {
        Some(b'\n') => Ok(Some(RelpFrame {
            txnr,
            command,
            data,
        })),
        Some(_) => {
            pool.release(data);
            Err(SplitError::Malformed("missing frame trailer"))
        }
        None => {
            pool.release(data);
            Err(SplitError::Malformed("eof before frame trailer"))
        }
    }
}

#[cfg(test)]
#[path = "splitter_test.rs"]
mod tests;
