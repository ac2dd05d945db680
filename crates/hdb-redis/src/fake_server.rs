//! Scriptable RESP server for exercising the adapter without a real Redis.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};

pub(crate) enum Reply {
    /// Built-in answer: `+OK`, `+QUEUED` inside MULTI, and a successful EXEC.
    Default,
    Raw(String),
    /// Read the command but never answer it.
    Silent,
    /// Drop the socket without answering.
    Close,
}

pub(crate) fn bulk(payload: &str) -> Reply {
    Reply::Raw(format!("${}\r\n{payload}\r\n", payload.len()))
}

pub(crate) fn nil() -> Reply {
    Reply::Raw("$-1\r\n".to_string())
}

pub(crate) fn aborted_exec() -> Reply {
    Reply::Raw("*-1\r\n".to_string())
}

type Script = dyn Fn(usize, &[String]) -> Reply + Send + Sync;

pub(crate) struct FakeRedis {
    pub addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    commands: Arc<Mutex<Vec<Vec<String>>>>,
}

impl FakeRedis {
    /// Serve every connection with `script(connection_index, command)`.
    pub async fn start<F>(script: F) -> Self
    where
        F: Fn(usize, &[String]) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let commands = Arc::new(Mutex::new(Vec::new()));
        let script: Arc<Script> = Arc::new(script);

        let accepted = connections.clone();
        let log = commands.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let index = accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(socket, index, script.clone(), log.clone()));
            }
        });

        Self {
            addr,
            connections,
            commands,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Number of commands seen whose name is `name`.
    pub fn count(&self, name: &str) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.first().is_some_and(|n| n.eq_ignore_ascii_case(name)))
            .count()
    }
}

async fn read_command(reader: &mut BufReader<TcpStream>) -> Option<Vec<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let argc: usize = line.trim().strip_prefix('*')?.parse().ok()?;
    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        line.clear();
        reader.read_line(&mut line).await.ok()?;
        let len: usize = line.trim().strip_prefix('$')?.parse().ok()?;
        let mut buf = vec![0u8; len + 2];
        reader.read_exact(&mut buf).await.ok()?;
        buf.truncate(len);
        args.push(String::from_utf8(buf).ok()?);
    }
    Some(args)
}

async fn serve(
    socket: TcpStream,
    index: usize,
    script: Arc<Script>,
    log: Arc<Mutex<Vec<Vec<String>>>>,
) {
    let mut reader = BufReader::new(socket);
    let mut queued: Option<usize> = None;

    while let Some(cmd) = read_command(&mut reader).await {
        log.lock().unwrap().push(cmd.clone());
        let name = cmd[0].to_ascii_uppercase();
        let reply = match script(index, &cmd) {
            Reply::Default => match (name.as_str(), queued) {
                ("MULTI", _) => {
                    queued = Some(0);
                    "+OK\r\n".to_string()
                }
                ("EXEC", Some(n)) => {
                    queued = None;
                    format!("*{n}\r\n{}", "+OK\r\n".repeat(n))
                }
                (_, Some(n)) => {
                    queued = Some(n + 1);
                    "+QUEUED\r\n".to_string()
                }
                _ => "+OK\r\n".to_string(),
            },
            Reply::Raw(raw) => {
                if name == "EXEC" {
                    queued = None;
                }
                raw
            }
            Reply::Silent => continue,
            Reply::Close => return,
        };
        if reader.get_mut().write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}
