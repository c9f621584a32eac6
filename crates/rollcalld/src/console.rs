//! Line-based operator console on stdin.
//!
//! `n` enrolls the first unknown face of the latest frame, `q` stops the
//! run. Credentials and identities are read from the same input. On a
//! terminal the administrator secret is read without echo.

use rollcall_core::{CredentialProvider, OperatorCommand, OperatorConsole};
use std::io::{BufRead, IsTerminal, Write};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

/// One read performed by the input thread.
enum ReadRequest {
    Line(String),
    Secret(String),
}

pub struct LineConsole {
    requests: Sender<ReadRequest>,
    lines: Receiver<String>,
    /// A `Line` read is outstanding on the input thread.
    awaiting_line: bool,
    max_attempts: u32,
}

impl LineConsole {
    /// Console fed by a background thread reading stdin.
    pub fn stdin(max_attempts: u32) -> Self {
        let (requests, request_rx) = mpsc::channel();
        let (line_tx, lines) = mpsc::channel();
        std::thread::Builder::new()
            .name("rollcall-console".into())
            .spawn(move || {
                let stdin = std::io::stdin();
                let interactive = stdin.is_terminal();
                serve(&mut stdin.lock(), interactive, request_rx, line_tx);
            })
            .expect("failed to spawn console thread");
        Self::with_channels(requests, lines, max_attempts)
    }

    /// Console reading from `input`, with secrets read as plain lines.
    pub fn from_reader<R>(input: R, max_attempts: u32) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (requests, request_rx) = mpsc::channel();
        let (line_tx, lines) = mpsc::channel();
        std::thread::Builder::new()
            .name("rollcall-console".into())
            .spawn(move || {
                let mut input = input;
                serve(&mut input, false, request_rx, line_tx);
            })
            .expect("failed to spawn console thread");
        Self::with_channels(requests, lines, max_attempts)
    }

    fn with_channels(
        requests: Sender<ReadRequest>,
        lines: Receiver<String>,
        max_attempts: u32,
    ) -> Self {
        Self {
            requests,
            lines,
            awaiting_line: false,
            max_attempts,
        }
    }

    /// Ask the input thread for one read and wait for it.
    fn read(&mut self, request: ReadRequest) -> Option<String> {
        if self.awaiting_line {
            // The input thread is already blocked on a plain line.
            self.awaiting_line = false;
            let (ReadRequest::Line(prompt) | ReadRequest::Secret(prompt)) = request;
            eprint!("{prompt}");
            let _ = std::io::stderr().flush();
        } else if self.requests.send(request).is_err() {
            return None;
        }
        self.lines.recv().ok()
    }
}

/// Serve read requests from `input` until input or the console closes.
fn serve(
    input: &mut dyn BufRead,
    interactive: bool,
    requests: Receiver<ReadRequest>,
    lines: Sender<String>,
) {
    for request in requests {
        let line = match request {
            ReadRequest::Secret(prompt) if interactive => rpassword::prompt_password(prompt).ok(),
            ReadRequest::Secret(prompt) | ReadRequest::Line(prompt) => {
                if !prompt.is_empty() {
                    eprint!("{prompt}");
                    let _ = std::io::stderr().flush();
                }
                read_line(input)
            }
        };
        let Some(line) = line else { break };
        if lines.send(line).is_err() {
            break;
        }
    }
}

fn read_line(input: &mut dyn BufRead) -> Option<String> {
    let mut buf = String::new();
    match input.read_line(&mut buf) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(buf.trim_end_matches('\n').to_string()),
    }
}

/// Map an input line to a command. Unrecognized lines are ignored.
pub fn parse_command(line: &str) -> Option<OperatorCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "n" | "enroll" => Some(OperatorCommand::Enroll),
        "q" | "quit" | "stop" => Some(OperatorCommand::Stop),
        _ => None,
    }
}

impl CredentialProvider for LineConsole {
    fn request_credential(&mut self, attempt: u32) -> Option<String> {
        // Secrets compare verbatim; only the line terminator is dropped.
        let prompt = format!(
            "Administrator password (attempt {attempt}/{}): ",
            self.max_attempts
        );
        self.read(ReadRequest::Secret(prompt))
            .map(|line| line.trim_end_matches('\r').to_string())
    }
}

impl OperatorConsole for LineConsole {
    fn poll_command(&mut self) -> Option<OperatorCommand> {
        loop {
            if !self.awaiting_line {
                if self.requests.send(ReadRequest::Line(String::new())).is_err() {
                    return None;
                }
                self.awaiting_line = true;
            }
            match self.lines.try_recv() {
                Ok(line) => {
                    self.awaiting_line = false;
                    if let Some(command) = parse_command(&line) {
                        return Some(command);
                    }
                    if !line.trim().is_empty() {
                        eprintln!("unknown command {:?}: 'n' to enroll, 'q' to quit", line.trim());
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }

    fn request_identity(&mut self) -> Option<String> {
        self.read(ReadRequest::Line("Identity of the new face: ".into()))
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
    }

    fn notify(&mut self, message: &str) {
        tracing::info!("{message}");
        eprintln!("{message}");
    }
}
