//! Ambient logging stack.
//!
//! `init_env_logger` wires the standard `log` facade the way the gateway's
//! style ancestor does: an unbounded channel feeds an async writer that
//! `env_logger` pipes through, so a slow disk never blocks a request-serving
//! task. `DailyLogWriter` additionally keeps one line-delimited JSON file per
//! UTC day under `logs/`, which is what backs the admin `GET /logs/list` and
//! `GET /logs?date=` reads (§6) — retention/rotation policy for those files
//! is out of scope (§1); this only ever appends to the current day's file.

use std::io::{self, Write};

use env_logger::Builder;
use log::LevelFilter;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

pub struct AsyncWriter {
    sender: UnboundedSender<Vec<u8>>,
}

impl Write for AsyncWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sender
            .send(buf.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct LogSink {
    sender: UnboundedSender<Vec<u8>>,
    receiver: Option<UnboundedReceiver<Vec<u8>>>,
}

impl LogSink {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded_channel();
        Self {
            sender,
            receiver: Some(receiver),
        }
    }

    pub fn init_env_logger(&self) {
        let writer = AsyncWriter {
            sender: self.sender.clone(),
        };
        Builder::from_env(env_logger::Env::default())
            .filter(None, LevelFilter::Info)
            .target(env_logger::Target::Pipe(Box::new(writer)))
            .init();
    }

    /// Spawns the background task that drains formatted log lines to disk.
    /// Takes the receiver, so this can only be called once per `LogSink`.
    pub fn spawn_file_writer(&mut self, dir: impl Into<std::path::PathBuf>) {
        let mut receiver = self.receiver.take().expect("file writer already spawned");
        let dir = dir.into();
        tokio::spawn(async move {
            if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                eprintln!("failed to create log directory {dir:?}: {e}");
                return;
            }
            let mut current_date = String::new();
            let mut file: Option<tokio::fs::File> = None;

            while let Some(line) = receiver.recv().await {
                let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
                if today != current_date || file.is_none() {
                    current_date = today.clone();
                    let path = dir.join(format!("{today}.log"));
                    file = tokio::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&path)
                        .await
                        .ok();
                }
                if let Some(f) = file.as_mut() {
                    use tokio::io::AsyncWriteExt;
                    let _ = f.write_all(&line).await;
                }
            }
        });
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Lists available daily log files (`GET /logs/list`, §6).
pub async fn list_log_dates(dir: &std::path::Path) -> Vec<String> {
    let mut dates = Vec::new();
    if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(date) = name.strip_suffix(".log") {
                    dates.push(date.to_string());
                }
            }
        }
    }
    dates.sort();
    dates
}

/// Reads one day's log file (`GET /logs?date=`, §6).
pub async fn read_log(dir: &std::path::Path, date: &str) -> io::Result<String> {
    tokio::fs::read_to_string(dir.join(format!("{date}.log"))).await
}
