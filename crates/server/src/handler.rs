use std::time::Duration;

use tokio::sync::broadcast;
use tracing::debug;

use squall_common::ConnectionError;
use squall_protocol::{Request, Response};
use squall_storage::Store;

use crate::Connection;

/// Loop principal de tratamento de uma conexão.
pub async fn handle_connection(
    mut conn: Connection,
    store: Store,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), ConnectionError> {
    loop {
        let request = tokio::select! {
            result = conn.read_request() => result?,
            _ = shutdown.recv() => {
                return Ok(());
            }
        };

        let request = match request {
            Some(r) => r,
            None => return Ok(()), // EOF
        };

        debug!("requisição recebida: {request:?}");
        let response = execute_request(request, &store).await;
        conn.write_response(&response).await?;
    }
}

/// Executa uma requisição contra o store e monta a resposta.
async fn execute_request(request: Request, store: &Store) -> Response {
    match request {
        Request::Set {
            key,
            value,
            ttl_seconds,
        } => {
            store
                .set(key, value, Duration::from_secs(ttl_seconds))
                .await;
            Response::Ok
        }
        Request::Get { key } => match store.get(&key) {
            Some(value) => Response::Value(value),
            None => Response::NotFound,
        },
        Request::Del { key } => {
            store.delete(&key).await;
            Response::Ok
        }
    }
}
