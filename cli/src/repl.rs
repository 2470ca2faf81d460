use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

/// Line reader for the REPL
pub struct Repl {
    lines: Lines<BufReader<Stdin>>,
}

impl Repl {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Prompt for one line. End of input and Ctrl-C both read as `exit`.
    pub async fn readline(&mut self) -> Result<String, String> {
        let mut stdout = std::io::stdout();
        write!(stdout, "$ ").map_err(|e| e.to_string())?;
        stdout.flush().map_err(|e| e.to_string())?;

        tokio::select! {
            line = self.lines.next_line() => {
                let line = line.map_err(|e| e.to_string())?;
                Ok(line.unwrap_or_else(|| "exit".to_string()))
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                Ok("exit".to_string())
            }
        }
    }
}

impl Default for Repl {
    fn default() -> Self {
        Self::new()
    }
}
