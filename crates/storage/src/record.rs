use bytes::{Buf, BufMut, BytesMut};
use std::io::Cursor;

use squall_common::RecordError;

/// Tamanho máximo de um campo de registro. Um registro maior que isso no
/// disco indica corrupção, não um valor legítimo.
const MAX_RECORD_FIELD: usize = 16 * 1024 * 1024; // 16 MB

const TAG_SET: u8 = 0x01;
const TAG_DEL: u8 = 0x02;

/// Registro do log append-only. O schema é fechado: um byte discriminador
/// seguido dos campos do comando, strings com prefixo de comprimento u32
/// big-endian e `expires_at` como i64 big-endian. Registros são
/// auto-delimitados e concatenados sem cabeçalho global.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Set {
        key: String,
        value: String,
        expires_at: i64,
    },
    Del {
        key: String,
    },
}

impl Record {
    /// Chave sobre a qual o registro opera.
    pub fn key(&self) -> &str {
        match self {
            Record::Set { key, .. } => key,
            Record::Del { key } => key,
        }
    }

    /// Verifica se um registro completo está disponível no cursor sem alocar.
    /// Retorna Err(Incomplete) para um registro truncado no final do arquivo.
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<(), RecordError> {
        match get_u8(src)? {
            TAG_SET => {
                skip_string(src)?;
                skip_string(src)?;
                skip(src, 8) // expires_at
            }
            TAG_DEL => skip_string(src),
            byte => Err(RecordError::InvalidTag(byte)),
        }
    }

    /// Faz o parse de um registro completo a partir do cursor.
    /// Deve ser chamado apenas após `check()` retornar Ok.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Record, RecordError> {
        match get_u8(src)? {
            TAG_SET => {
                let key = get_string(src)?;
                let value = get_string(src)?;
                let expires_at = get_i64(src)?;
                Ok(Record::Set {
                    key,
                    value,
                    expires_at,
                })
            }
            TAG_DEL => Ok(Record::Del {
                key: get_string(src)?,
            }),
            byte => Err(RecordError::InvalidTag(byte)),
        }
    }

    /// Encoda o registro no buffer de saída.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Record::Set {
                key,
                value,
                expires_at,
            } => {
                dst.put_u8(TAG_SET);
                put_string(dst, key);
                put_string(dst, value);
                dst.put_i64(*expires_at);
            }
            Record::Del { key } => {
                dst.put_u8(TAG_DEL);
                put_string(dst, key);
            }
        }
    }
}

fn put_string(dst: &mut BytesMut, s: &str) {
    dst.put_u32(s.len() as u32);
    dst.put(s.as_bytes());
}

fn get_u8(src: &mut Cursor<&[u8]>) -> Result<u8, RecordError> {
    if !src.has_remaining() {
        return Err(RecordError::Incomplete);
    }
    Ok(src.get_u8())
}

fn get_i64(src: &mut Cursor<&[u8]>) -> Result<i64, RecordError> {
    if src.remaining() < 8 {
        return Err(RecordError::Incomplete);
    }
    Ok(src.get_i64())
}

fn string_len(src: &mut Cursor<&[u8]>) -> Result<usize, RecordError> {
    if src.remaining() < 4 {
        return Err(RecordError::Incomplete);
    }
    let len = src.get_u32() as usize;
    if len > MAX_RECORD_FIELD {
        return Err(RecordError::RecordTooLarge(len));
    }
    Ok(len)
}

fn skip_string(src: &mut Cursor<&[u8]>) -> Result<(), RecordError> {
    let len = string_len(src)?;
    skip(src, len)
}

fn get_string(src: &mut Cursor<&[u8]>) -> Result<String, RecordError> {
    let len = string_len(src)?;
    if src.remaining() < len {
        return Err(RecordError::Incomplete);
    }
    let start = src.position() as usize;
    let s = std::str::from_utf8(&src.get_ref()[start..start + len])
        .map_err(|e| RecordError::InvalidEncoding(e.to_string()))?
        .to_string();
    src.set_position((start + len) as u64);
    Ok(s)
}

fn skip(src: &mut Cursor<&[u8]>, n: usize) -> Result<(), RecordError> {
    if src.remaining() < n {
        return Err(RecordError::Incomplete);
    }
    src.set_position(src.position() + n as u64);
    Ok(())
}
