use bytes::BytesMut;
use std::io::Cursor;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

use squall_common::{ConnectionError, INITIAL_BUFFER_CAPACITY, ProtocolError};
use squall_protocol::{Request, Response};

/// Wrapper sobre TcpStream com buffer para leitura/escrita de mensagens
/// do protocolo.
pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Lê uma requisição completa do stream. Retorna None no EOF.
    pub async fn read_request(&mut self) -> Result<Option<Request>, ConnectionError> {
        loop {
            if let Some(request) = self.parse_request()? {
                return Ok(Some(request));
            }

            let n = self.stream.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ConnectionError::ConnectionReset);
            }
        }
    }

    /// Escreve uma resposta no stream.
    pub async fn write_response(&mut self, response: &Response) -> Result<(), ConnectionError> {
        let mut buf = BytesMut::new();
        response.encode(&mut buf);
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    fn parse_request(&mut self) -> Result<Option<Request>, ConnectionError> {
        let mut cursor = Cursor::new(&self.buffer[..]);

        match Request::check(&mut cursor) {
            Ok(()) => {
                let len = cursor.position() as usize;
                cursor.set_position(0);
                let request = Request::parse(&mut cursor).map_err(invalid_data)?;
                self.buffer = self.buffer.split_off(len);
                Ok(Some(request))
            }
            Err(ProtocolError::Incomplete) => Ok(None),
            Err(e) => Err(invalid_data(e)),
        }
    }
}

fn invalid_data(e: ProtocolError) -> ConnectionError {
    ConnectionError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        e.to_string(),
    ))
}
