use std::io::{self, Write};

use log::warn;

/// Where `puts`, `print` and `p` write.
#[derive(Debug)]
pub enum Output {
    Stdout,
    /// Collected in memory, for tests and embedding.
    Captured(String),
}

impl Output {
    pub fn write(&mut self, text: &str) {
        match self {
            Output::Stdout => {
                let mut stdout = io::stdout().lock();
                if let Err(err) = stdout.write_all(text.as_bytes()).and_then(|()| stdout.flush()) {
                    warn!("writing to stdout failed: {err}");
                }
            }
            Output::Captured(buffer) => buffer.push_str(text),
        }
    }

    /// Drain captured text. Always empty for stdout.
    pub fn take(&mut self) -> String {
        match self {
            Output::Stdout => String::new(),
            Output::Captured(buffer) => std::mem::take(buffer),
        }
    }
}
