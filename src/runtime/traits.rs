//! Trait abstractions for runtime I/O

use async_trait::async_trait;
use std::io::{self, BufRead};
use tokio::sync::mpsc;

/// Source of operator messages
#[async_trait]
pub trait InputSource: Send {
    /// Next line of input, or `None` once input is exhausted
    async fn next_message(&mut self) -> io::Result<Option<String>>;
}

/// Line-oriented input from the process's stdin.
///
/// Lines are read on a detached thread so a pending read never holds the
/// process open at exit.
pub struct StdinInput {
    rx: mpsc::Receiver<io::Result<String>>,
}

impl StdinInput {
    pub fn spawn() -> io::Result<Self> {
        let (tx, rx) = mpsc::channel(1);
        std::thread::Builder::new()
            .name("stdin-reader".to_string())
            .spawn(move || {
                let mut stdin = io::stdin().lock();
                while let Some(line) = read_line_lossy(&mut stdin).transpose() {
                    let failed = line.is_err();
                    if tx.blocking_send(line).is_err() || failed {
                        break;
                    }
                }
            })?;
        Ok(Self { rx })
    }
}

/// One line without its terminator. Invalid UTF-8 is replaced rather than
/// rejected. `None` at end of input.
fn read_line_lossy<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf)? == 0 {
        return Ok(None);
    }
    let line = buf.strip_suffix(b"\n").unwrap_or(&buf);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    Ok(Some(String::from_utf8_lossy(line).into_owned()))
}

#[async_trait]
impl InputSource for StdinInput {
    async fn next_message(&mut self) -> io::Result<Option<String>> {
        self.rx.recv().await.transpose()
    }
}
