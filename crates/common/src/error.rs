/// Erros de parsing do protocolo de rede.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("mensagem incompleta")]
    Incomplete,
    #[error("byte de tipo inválido: {0:#x}")]
    InvalidMessageType(u8),
    #[error("mensagem excede tamanho máximo ({0} bytes)")]
    MessageTooLarge(usize),
    #[error("encoding inválido: {0}")]
    InvalidEncoding(String),
}

/// Erros de decodificação de registros do log de persistência.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("registro incompleto")]
    Incomplete,
    #[error("discriminador de registro inválido: {0:#x}")]
    InvalidTag(u8),
    #[error("registro excede tamanho máximo ({0} bytes)")]
    RecordTooLarge(usize),
    #[error("encoding inválido: {0}")]
    InvalidEncoding(String),
}

/// Erros do motor de armazenamento.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("chave não encontrada")]
    KeyNotFound,
    #[error("I/O no log de persistência: {0}")]
    Io(#[from] std::io::Error),
}

/// Erros de conexão TCP.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("conexão resetada pelo peer")]
    ConnectionReset,
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Erro top-level do Squall.
#[derive(Debug, thiserror::Error)]
pub enum SquallError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Result type alias.
pub type SquallResult<T> = Result<T, SquallError>;

// Conversão implícita de io::Error → SquallError (via ConnectionError)
impl From<std::io::Error> for SquallError {
    fn from(e: std::io::Error) -> Self {
        SquallError::Connection(ConnectionError::Io(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_display() {
        let err = ProtocolError::Incomplete;
        assert_eq!(err.to_string(), "mensagem incompleta");
    }

    #[test]
    fn record_error_display() {
        let err = RecordError::InvalidTag(0x7f);
        assert_eq!(err.to_string(), "discriminador de registro inválido: 0x7f");
    }

    #[test]
    fn storage_error_display() {
        let err = StorageError::KeyNotFound;
        assert_eq!(err.to_string(), "chave não encontrada");
    }

    #[test]
    fn squall_error_from_record() {
        let err: SquallError = RecordError::Incomplete.into();
        assert!(matches!(err, SquallError::Record(RecordError::Incomplete)));
    }

    #[test]
    fn squall_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken");
        let err: SquallError = io_err.into();
        assert!(matches!(
            err,
            SquallError::Connection(ConnectionError::Io(_))
        ));
    }
}
