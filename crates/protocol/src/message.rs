use bytes::{Buf, BufMut, BytesMut};
use std::io::Cursor;

use squall_common::{MAX_FRAME_SIZE, ProtocolError};

// Tags de requisição.
const TAG_SET: u8 = 0x01;
const TAG_GET: u8 = 0x02;
const TAG_DEL: u8 = 0x03;

// Tags de resposta.
const TAG_OK: u8 = 0x80;
const TAG_VALUE: u8 = 0x81;
const TAG_NOT_FOUND: u8 = 0x82;
const TAG_ERROR: u8 = 0x83;

/// Requisição do protocolo: uma das três chamadas unárias do serviço.
/// `ttl_seconds == 0` significa sem expiração.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Set {
        key: String,
        value: String,
        ttl_seconds: u64,
    },
    Get {
        key: String,
    },
    Del {
        key: String,
    },
}

/// Resposta do protocolo.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ok,
    Value(String),
    NotFound,
    Error(String),
}

impl Request {
    /// Verifica se uma requisição completa está disponível no buffer sem alocar.
    /// Retorna Ok(()) se completa, Err(Incomplete) se precisa mais dados.
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<(), ProtocolError> {
        match get_u8(src)? {
            TAG_SET => {
                skip_string(src)?;
                skip_string(src)?;
                skip(src, 8) // ttl_seconds
            }
            TAG_GET | TAG_DEL => skip_string(src),
            byte => Err(ProtocolError::InvalidMessageType(byte)),
        }
    }

    /// Faz o parse de uma requisição completa a partir do cursor.
    /// Deve ser chamado apenas após `check()` retornar Ok.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Request, ProtocolError> {
        match get_u8(src)? {
            TAG_SET => {
                let key = get_string(src)?;
                let value = get_string(src)?;
                let ttl_seconds = get_u64(src)?;
                Ok(Request::Set {
                    key,
                    value,
                    ttl_seconds,
                })
            }
            TAG_GET => Ok(Request::Get {
                key: get_string(src)?,
            }),
            TAG_DEL => Ok(Request::Del {
                key: get_string(src)?,
            }),
            byte => Err(ProtocolError::InvalidMessageType(byte)),
        }
    }

    /// Encoda a requisição no buffer de saída.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Request::Set {
                key,
                value,
                ttl_seconds,
            } => {
                dst.put_u8(TAG_SET);
                put_string(dst, key);
                put_string(dst, value);
                dst.put_u64(*ttl_seconds);
            }
            Request::Get { key } => {
                dst.put_u8(TAG_GET);
                put_string(dst, key);
            }
            Request::Del { key } => {
                dst.put_u8(TAG_DEL);
                put_string(dst, key);
            }
        }
    }
}

impl Response {
    /// Verifica se uma resposta completa está disponível no buffer.
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<(), ProtocolError> {
        match get_u8(src)? {
            TAG_OK | TAG_NOT_FOUND => Ok(()),
            TAG_VALUE | TAG_ERROR => skip_string(src),
            byte => Err(ProtocolError::InvalidMessageType(byte)),
        }
    }

    /// Faz o parse de uma resposta completa a partir do cursor.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Response, ProtocolError> {
        match get_u8(src)? {
            TAG_OK => Ok(Response::Ok),
            TAG_VALUE => Ok(Response::Value(get_string(src)?)),
            TAG_NOT_FOUND => Ok(Response::NotFound),
            TAG_ERROR => Ok(Response::Error(get_string(src)?)),
            byte => Err(ProtocolError::InvalidMessageType(byte)),
        }
    }

    /// Encoda a resposta no buffer de saída.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Response::Ok => dst.put_u8(TAG_OK),
            Response::Value(value) => {
                dst.put_u8(TAG_VALUE);
                put_string(dst, value);
            }
            Response::NotFound => dst.put_u8(TAG_NOT_FOUND),
            Response::Error(message) => {
                dst.put_u8(TAG_ERROR);
                put_string(dst, message);
            }
        }
    }
}

// Strings no fio: comprimento u32 big-endian + bytes UTF-8.

fn put_string(dst: &mut BytesMut, s: &str) {
    dst.put_u32(s.len() as u32);
    dst.put(s.as_bytes());
}

fn get_u8(src: &mut Cursor<&[u8]>) -> Result<u8, ProtocolError> {
    if !src.has_remaining() {
        return Err(ProtocolError::Incomplete);
    }
    Ok(src.get_u8())
}

fn get_u64(src: &mut Cursor<&[u8]>) -> Result<u64, ProtocolError> {
    if src.remaining() < 8 {
        return Err(ProtocolError::Incomplete);
    }
    Ok(src.get_u64())
}

fn string_len(src: &mut Cursor<&[u8]>) -> Result<usize, ProtocolError> {
    if src.remaining() < 4 {
        return Err(ProtocolError::Incomplete);
    }
    let len = src.get_u32() as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::MessageTooLarge(len));
    }
    Ok(len)
}

fn skip_string(src: &mut Cursor<&[u8]>) -> Result<(), ProtocolError> {
    let len = string_len(src)?;
    skip(src, len)
}

fn get_string(src: &mut Cursor<&[u8]>) -> Result<String, ProtocolError> {
    let len = string_len(src)?;
    if src.remaining() < len {
        return Err(ProtocolError::Incomplete);
    }
    let start = src.position() as usize;
    let s = std::str::from_utf8(&src.get_ref()[start..start + len])
        .map_err(|e| ProtocolError::InvalidEncoding(e.to_string()))?
        .to_string();
    src.set_position((start + len) as u64);
    Ok(s)
}

fn skip(src: &mut Cursor<&[u8]>, n: usize) -> Result<(), ProtocolError> {
    if src.remaining() < n {
        return Err(ProtocolError::Incomplete);
    }
    src.set_position(src.position() + n as u64);
    Ok(())
}
