//! RouterOS API wire format.
//!
//! A word is a variable-length size prefix followed by the bytes. A sentence
//! is a run of words closed by an empty word. The router answers a command
//! with zero or more `!re` sentences and a final `!done`; a failed command
//! sends `!trap` before `!done`. RouterOS 7.18 and later send `!empty`
//! before `!done` when a print has no records.

use std::collections::HashMap;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("word too long: {0} bytes")]
    WordTooLong(usize),

    #[error("invalid length prefix 0x{0:02x}")]
    InvalidLength(u8),

    #[error("empty reply")]
    EmptyReply,

    #[error("unexpected reply '{0}'")]
    UnexpectedReply(String),

    #[error("{0}")]
    Trap(String),

    #[error("router closed the session: {0}")]
    Fatal(String),

    #[error("malformed reply: {0}")]
    Malformed(String),

    #[error("timed out")]
    Timeout,
}

/// `=key=value` attribute words of one reply sentence.
pub type Attributes = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Re(Attributes),
    Empty,
    Done(Attributes),
    Trap(Attributes),
    Fatal(String),
}

/// Append the length prefix for a word of `len` bytes.
pub fn encode_length(len: usize, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    let len32 = u32::try_from(len).map_err(|_| ProtocolError::WordTooLong(len))?;
    match len32 {
        0..=0x7F => out.push(len32 as u8),
        0x80..=0x3FFF => out.extend_from_slice(&((len32 | 0x8000) as u16).to_be_bytes()),
        0x4000..=0x1F_FFFF => out.extend_from_slice(&(len32 | 0xC0_0000).to_be_bytes()[1..]),
        0x20_0000..=0x0FFF_FFFF => out.extend_from_slice(&(len32 | 0xE000_0000).to_be_bytes()),
        _ => {
            out.push(0xF0);
            out.extend_from_slice(&len32.to_be_bytes());
        }
    }
    Ok(())
}

pub async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> Result<usize, ProtocolError> {
    let first = reader.read_u8().await?;

    let len = if first & 0x80 == 0 {
        u32::from(first)
    } else if first & 0xC0 == 0x80 {
        let next = reader.read_u8().await?;
        u32::from(first & 0x3F) << 8 | u32::from(next)
    } else if first & 0xE0 == 0xC0 {
        let next = reader.read_u16().await?;
        u32::from(first & 0x1F) << 16 | u32::from(next)
    } else if first & 0xF0 == 0xE0 {
        let mut rest = [0u8; 3];
        reader.read_exact(&mut rest).await?;
        u32::from(first & 0x0F) << 24
            | u32::from(rest[0]) << 16
            | u32::from(rest[1]) << 8
            | u32::from(rest[2])
    } else if first == 0xF0 {
        reader.read_u32().await?
    } else {
        return Err(ProtocolError::InvalidLength(first));
    };

    Ok(len as usize)
}

pub fn encode_sentence<S: AsRef<str>>(words: &[S]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::new();
    for word in words {
        let bytes = word.as_ref().as_bytes();
        encode_length(bytes.len(), &mut out)?;
        out.extend_from_slice(bytes);
    }
    out.push(0);
    Ok(out)
}

pub async fn write_sentence<W, S>(writer: &mut W, words: &[S]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    S: AsRef<str>,
{
    let bytes = encode_sentence(words)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_sentence<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Vec<String>, ProtocolError> {
    let mut words = Vec::new();
    loop {
        let len = read_length(reader).await?;
        if len == 0 {
            return Ok(words);
        }
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        // Comments written from Winbox are not always UTF-8
        let word = String::from_utf8(buf)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());
        words.push(word);
    }
}

/// Split `=key=value` words into attributes. Tags and API words are skipped.
pub fn parse_attributes<S: AsRef<str>>(words: &[S]) -> Attributes {
    words
        .iter()
        .filter_map(|word| {
            let rest = word.as_ref().strip_prefix('=')?;
            let (key, value) = rest.split_once('=').unwrap_or((rest, ""));
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

pub fn parse_reply(words: Vec<String>) -> Result<Reply, ProtocolError> {
    let (kind, rest) = words.split_first().ok_or(ProtocolError::EmptyReply)?;
    match kind.as_str() {
        "!re" => Ok(Reply::Re(parse_attributes(rest))),
        "!empty" => Ok(Reply::Empty),
        "!done" => Ok(Reply::Done(parse_attributes(rest))),
        "!trap" => Ok(Reply::Trap(parse_attributes(rest))),
        "!fatal" => Ok(Reply::Fatal(rest.join(" "))),
        other => Err(ProtocolError::UnexpectedReply(other.to_string())),
    }
}

/// `=key=value` word for a command.
pub fn attribute_word(key: &str, value: &str) -> String {
    format!("={key}={value}")
}
