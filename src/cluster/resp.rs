//! RESP2 codec for the admin connection
//!
//! Commands are always sent as arrays of bulk strings; replies are decoded
//! from any buffered async reader.

use crate::common::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::future::{BoxFuture, FutureExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Upper bound on a single bulk string or array length we accept.
pub const MAX_BULK_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Option<Bytes>),
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Text content of a simple or bulk string reply.
    pub fn into_text(self) -> Result<String> {
        match self {
            RespValue::SimpleString(s) => Ok(s),
            RespValue::BulkString(Some(b)) => String::from_utf8(b.to_vec())
                .map_err(|e| Error::Protocol(format!("reply is not UTF-8: {}", e))),
            other => Err(Error::Protocol(format!("expected string reply, got {:?}", other))),
        }
    }

    /// Accept `+OK`, reject anything else.
    pub fn expect_ok(self) -> Result<()> {
        match self {
            RespValue::SimpleString(s) if s == "OK" => Ok(()),
            other => Err(Error::Protocol(format!("expected +OK, got {:?}", other))),
        }
    }
}

/// Append `args` to `buf` as a RESP array of bulk strings.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], buf: &mut BytesMut) {
    buf.put_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        let arg = arg.as_ref();
        buf.put_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.put_slice(arg);
        buf.put_slice(b"\r\n");
    }
}

async fn read_line<R: AsyncBufRead + Unpin + Send>(reader: &mut R) -> Result<String> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(Error::ConnectionFailed("connection closed by peer".into()));
    }
    if !line.ends_with("\r\n") {
        return Err(Error::Protocol(format!("unterminated line {:?}", line)));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

fn parse_len(raw: &str) -> Result<Option<usize>> {
    let len: i64 = raw
        .parse()
        .map_err(|_| Error::Protocol(format!("bad length {:?}", raw)))?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    if len > MAX_BULK_LEN {
        return Err(Error::Protocol(format!("length {} exceeds limit", len)));
    }
    Ok(Some(len))
}

/// Read one complete reply.
pub fn read_value<'a, R>(reader: &'a mut R) -> BoxFuture<'a, Result<RespValue>>
where
    R: AsyncBufRead + Unpin + Send,
{
    async move {
        let line = read_line(reader).await?;
        let mut chars = line.chars();
        let kind = chars.next();
        let rest = chars.as_str();
        match kind {
            Some('+') => Ok(RespValue::SimpleString(rest.to_string())),
            Some('-') => Ok(RespValue::Error(rest.to_string())),
            Some(':') => rest
                .parse()
                .map(RespValue::Integer)
                .map_err(|_| Error::Protocol(format!("bad integer {:?}", rest))),
            Some('$') => match parse_len(rest)? {
                None => Ok(RespValue::BulkString(None)),
                Some(len) => {
                    let mut data = vec![0u8; len + 2];
                    reader.read_exact(&mut data).await?;
                    if &data[len..] != b"\r\n" {
                        return Err(Error::Protocol("bulk string missing CRLF".into()));
                    }
                    data.truncate(len);
                    Ok(RespValue::BulkString(Some(Bytes::from(data))))
                }
            },
            Some('*') => match parse_len(rest)? {
                None => Ok(RespValue::Array(None)),
                Some(len) => {
                    let mut items = Vec::with_capacity(len.min(1024));
                    for _ in 0..len {
                        items.push(read_value(reader).await?);
                    }
                    Ok(RespValue::Array(Some(items)))
                }
            },
            _ => Err(Error::Protocol(format!("unknown reply type {:?}", line))),
        }
    }
    .boxed()
}
