use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, interval};
use tracing::{debug, info, warn};

use squall_common::RecordError;

use crate::record::Record;

/// Capacidade da fila do writer. Limitada de propósito: produtores
/// bloqueiam quando ela enche, em vez de mascarar um fsync lento
/// acumulando memória sem teto.
pub(crate) const AOF_QUEUE_CAPACITY: usize = 1000;

/// Política de fsync.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub enum FsyncPolicy {
    /// Fsync após cada registro.
    #[default]
    Always,
    /// Fsync a cada segundo.
    EverySec,
    /// Sem fsync explícito (deixa pro OS).
    No,
}

/// Mensagens aceitas pelo writer. Compactação e shutdown viajam na mesma
/// fila FIFO dos appends: quando uma compactação roda, tudo que foi
/// enfileirado antes dela já está no arquivo, e o que vier depois cai no
/// arquivo novo.
pub(crate) enum AofCommand {
    Append(Record),
    Compact {
        expired: HashSet<String>,
        done: oneshot::Sender<std::io::Result<usize>>,
    },
    Shutdown,
}

/// Writer que recebe comandos via channel e faz append no arquivo AOF.
pub(crate) struct AofWriter {
    rx: mpsc::Receiver<AofCommand>,
    path: PathBuf,
    policy: FsyncPolicy,
    file: BufWriter<File>,
}

impl AofWriter {
    /// Abre o arquivo em modo append. Falhar aqui é o único erro fatal do
    /// caminho de persistência; é devolvido ao chamador do startup.
    async fn open(
        path: PathBuf,
        policy: FsyncPolicy,
        rx: mpsc::Receiver<AofCommand>,
    ) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            rx,
            path,
            policy,
            file: BufWriter::new(file),
        })
    }

    /// Loop principal: recebe comandos e escreve no arquivo. Erros de
    /// escrita/sync são logados e o loop continua — durabilidade é melhor
    /// esforço, o cache em memória segue servindo.
    pub async fn run(mut self) {
        let mut tick = interval(Duration::from_secs(1));
        info!("AOF writer iniciado: {:?}", self.path);

        loop {
            tokio::select! {
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(AofCommand::Append(record)) => {
                            if let Err(e) = self.append(&record).await {
                                warn!("falha ao gravar registro no AOF: {e}");
                            }
                        }
                        Some(AofCommand::Compact { expired, done }) => {
                            let result = self.compact(&expired).await;
                            if let Err(ref e) = result {
                                warn!("compactação do AOF falhou: {e}");
                            }
                            let _ = done.send(result);
                        }
                        Some(AofCommand::Shutdown) | None => {
                            if let Err(e) = self.sync().await {
                                warn!("flush final do AOF falhou: {e}");
                            }
                            info!("AOF writer encerrado");
                            return;
                        }
                    }
                }
                _ = tick.tick(), if self.policy == FsyncPolicy::EverySec => {
                    if let Err(e) = self.sync().await {
                        warn!("fsync periódico do AOF falhou: {e}");
                    }
                }
            }
        }
    }

    async fn append(&mut self, record: &Record) -> std::io::Result<()> {
        let mut buf = BytesMut::new();
        record.encode(&mut buf);
        self.file.write_all(&buf).await?;
        if self.policy == FsyncPolicy::Always {
            self.sync().await?;
        }
        Ok(())
    }

    async fn sync(&mut self) -> std::io::Result<()> {
        self.file.flush().await?;
        self.file.get_ref().sync_data().await
    }

    /// Reescreve o log sem os registros das chaves em `expired` e religa o
    /// writer no arquivo novo. Retorna quantos registros sobreviveram.
    /// Idempotente: compactar duas vezes com o mesmo conjunto produz o
    /// mesmo arquivo.
    async fn compact(&mut self, expired: &HashSet<String>) -> std::io::Result<usize> {
        // Tudo que chegou antes desta mensagem já passou pelo write_all;
        // garante que está no disco antes de reler o arquivo.
        self.sync().await?;

        let records = read_records(&self.path).await?;
        let mut out = BytesMut::new();
        let mut kept = 0usize;
        for record in &records {
            if !expired.contains(record.key()) {
                record.encode(&mut out);
                kept += 1;
            }
        }

        // Escreve num arquivo irmão e renomeia por cima do canônico.
        let tmp_path = compact_tmp_path(&self.path);
        let mut tmp = File::create(&tmp_path).await?;
        tmp.write_all(&out).await?;
        tmp.sync_all().await?;
        drop(tmp);
        tokio::fs::rename(&tmp_path, &self.path).await?;

        // fsync do diretório: sem ele o rename pode se perder num crash
        // entre a troca e o próximo sync do filesystem.
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        match File::open(parent).await {
            Ok(dir) => {
                if let Err(e) = dir.sync_all().await {
                    warn!("fsync do diretório do AOF falhou: {e}");
                }
            }
            Err(e) => warn!("não consegui abrir o diretório do AOF para fsync: {e}"),
        }

        // Religa o writer: appends enfileirados depois desta mensagem vão
        // para o arquivo novo.
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        self.file = BufWriter::new(file);

        debug!(kept, dropped = records.len() - kept, "AOF compactado");
        Ok(kept)
    }
}

fn compact_tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".compact");
    PathBuf::from(os)
}

/// Cria o par (sender, writer) para uso no store.
pub(crate) async fn create_aof(
    path: PathBuf,
    policy: FsyncPolicy,
) -> std::io::Result<(mpsc::Sender<AofCommand>, AofWriter)> {
    let (tx, rx) = mpsc::channel(AOF_QUEUE_CAPACITY);
    let writer = AofWriter::open(path, policy, rx).await?;
    Ok((tx, writer))
}

/// Lê o arquivo AOF e devolve os registros decodificados em ordem. Um
/// registro truncado ou malformado encerra a leitura ali: o que foi
/// decodificado até então é mantido, o resto é tratado como fim de
/// arquivo.
pub(crate) async fn read_records(path: &Path) -> std::io::Result<Vec<Record>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let data = tokio::fs::read(path).await?;
    let mut cursor = Cursor::new(&data[..]);
    let mut records = Vec::new();

    loop {
        if cursor.position() as usize >= data.len() {
            break;
        }

        let check_pos = cursor.position();
        match Record::check(&mut cursor) {
            Ok(()) => {
                cursor.set_position(check_pos);
                match Record::parse(&mut cursor) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        warn!("AOF: registro corrompido, parando leitura: {e}");
                        break;
                    }
                }
            }
            Err(RecordError::Incomplete) => {
                warn!("AOF: registro incompleto no final do arquivo, parando leitura");
                break;
            }
            Err(e) => {
                warn!("AOF: registro inválido, parando leitura: {e}");
                break;
            }
        }
    }

    Ok(records)
}
