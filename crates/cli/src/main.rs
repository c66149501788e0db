use std::io::{self, Cursor, Write};

use bytes::BytesMut;
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use squall_common::{DEFAULT_HOST, DEFAULT_PORT, ProtocolError};
use squall_protocol::{Request, Response};

#[derive(Parser, Debug)]
#[command(name = "squall-cli", about = "Squall CLI client")]
struct Args {
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Comando para executar diretamente (modo não interativo)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    let mut stream = TcpStream::connect(&addr).await?;

    // Modo comando único (via argumentos)
    if !args.command.is_empty() {
        match build_request(&args.command) {
            Ok(request) => execute_request(&mut stream, &request).await?,
            Err(e) => println!("(error) {e}"),
        }
        return Ok(());
    }

    println!("Conectado a {addr}");

    let stdin = io::stdin();
    let mut input = String::new();

    loop {
        print!("squall> ");
        io::stdout().flush()?;

        input.clear();
        if stdin.read_line(&mut input)? == 0 {
            break; // EOF
        }

        let line = input.trim();
        if line.is_empty() {
            continue;
        }

        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            break;
        }

        let tokens = tokenize(line);
        if tokens.is_empty() {
            continue;
        }

        match build_request(&tokens) {
            Ok(request) => {
                if let Err(e) = execute_request(&mut stream, &request).await {
                    println!("(error) {e}");
                }
            }
            Err(e) => println!("(error) {e}"),
        }
    }

    Ok(())
}

/// Monta uma Request a partir dos tokens digitados.
fn build_request(tokens: &[String]) -> Result<Request, String> {
    match tokens[0].to_uppercase().as_str() {
        "SET" => match tokens.len() {
            3 => Ok(Request::Set {
                key: tokens[1].clone(),
                value: tokens[2].clone(),
                ttl_seconds: 0,
            }),
            4 => {
                let ttl_seconds = tokens[3]
                    .parse::<u64>()
                    .map_err(|_| format!("TTL inválido: '{}'", tokens[3]))?;
                Ok(Request::Set {
                    key: tokens[1].clone(),
                    value: tokens[2].clone(),
                    ttl_seconds,
                })
            }
            _ => Err("uso: SET <chave> <valor> [ttl_segundos]".into()),
        },
        "GET" => match tokens.len() {
            2 => Ok(Request::Get {
                key: tokens[1].clone(),
            }),
            _ => Err("uso: GET <chave>".into()),
        },
        "DEL" => match tokens.len() {
            2 => Ok(Request::Del {
                key: tokens[1].clone(),
            }),
            _ => Err("uso: DEL <chave>".into()),
        },
        other => Err(format!("comando desconhecido: '{other}'")),
    }
}

async fn execute_request(stream: &mut TcpStream, request: &Request) -> anyhow::Result<()> {
    let mut buf = BytesMut::new();
    request.encode(&mut buf);
    stream.write_all(&buf).await?;
    stream.flush().await?;

    let mut response_buf = BytesMut::with_capacity(4096);
    loop {
        let mut cursor = Cursor::new(&response_buf[..]);
        match Response::check(&mut cursor) {
            Ok(()) => {
                cursor.set_position(0);
                let response = Response::parse(&mut cursor)?;
                print_response(&response);
                return Ok(());
            }
            Err(ProtocolError::Incomplete) => {}
            Err(e) => return Err(e.into()),
        }

        let n = stream.read_buf(&mut response_buf).await?;
        if n == 0 {
            anyhow::bail!("conexão fechada pelo servidor");
        }
    }
}

fn print_response(response: &Response) {
    match response {
        Response::Ok => println!("OK"),
        Response::Value(value) => println!("\"{value}\""),
        Response::NotFound => println!("(nil)"),
        Response::Error(message) => println!("(error) {message}"),
    }
}

/// Tokeniza a linha respeitando aspas duplas.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}
