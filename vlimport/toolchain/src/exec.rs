use std::io::{self, Read};
use std::process::{Child, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use std::{ascii, fmt};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How a subprocess terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Code(i32),
    /// Terminated by a signal; there is no exit code.
    Signal,
    /// Killed after running longer than the allowed time.
    TimedOut(Duration),
}

impl Status {
    pub fn success(self) -> bool {
        self == Status::Success
    }

    pub fn code(self) -> Option<i32> {
        match self {
            Status::Success => Some(0),
            Status::Code(code) => Some(code),
            Status::Signal | Status::TimedOut(_) => None,
        }
    }

    fn from_exit_status(status: ExitStatus) -> Status {
        match status.code() {
            _ if status.success() => Status::Success,
            Some(code) => Status::Code(code),
            None => Status::Signal,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => write!(f, "exit code 0"),
            Status::Code(code) => write!(f, "exit code {code}"),
            Status::Signal => write!(f, "terminated by signal"),
            Status::TimedOut(limit) => write!(f, "timed out after {:.1}s", limit.as_secs_f64()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Captured {
    pub status: Status,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Captured {
    /// stderr followed by stdout, the order compilers print diagnostics that matter in
    pub fn diagnostics(&self) -> String {
        let mut output = self.stderr.clone();
        output.extend_from_slice(&self.stdout);
        escape_output(&output)
    }
}

/// Runs `cmd` to completion with stdin closed and both output streams captured.
///
/// With a `timeout` the child is killed once the deadline passes and the result reports
/// [`Status::TimedOut`]. Output of a killed child is discarded. Descendants of the child may
/// hold the pipes open after it exited, collecting output stops at the same deadline and keeps
/// whatever arrived until then.
pub fn run(cmd: &mut std::process::Command, timeout: Option<Duration>) -> io::Result<Captured> {
    let start = Instant::now();
    let mut child =
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).spawn()?;
    let (tx, rx) = mpsc::channel();
    drain(child.stdout.take(), Stream::Stdout, &tx);
    drain(child.stderr.take(), Stream::Stderr, &tx);
    drop(tx);

    let deadline = timeout.map(|limit| start + limit);
    let status = match timeout {
        Some(limit) => match wait_until(&mut child, start + limit)? {
            Some(status) => Status::from_exit_status(status),
            None => {
                log::debug!(
                    "killing {:?}, still running after {:.1}s",
                    cmd.get_program(),
                    limit.as_secs_f64()
                );
                // the child may have exited between the last poll and the kill
                let _ = child.kill();
                child.wait()?;
                return Ok(Captured {
                    status: Status::TimedOut(limit),
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                });
            }
        },
        None => Status::from_exit_status(child.wait()?),
    };

    let mut captured = Captured { status, stdout: Vec::new(), stderr: Vec::new() };
    if !captured.collect(&rx, deadline) {
        log::debug!(
            "{:?} exited but its output is still open, keeping {} bytes received so far",
            cmd.get_program(),
            captured.stdout.len() + captured.stderr.len()
        );
    }
    Ok(captured)
}

impl Captured {
    /// Appends chunks from the drain threads until both pipes closed or `deadline` passed.
    /// Returns `false` in the latter case.
    fn collect(&mut self, rx: &Receiver<(Stream, Vec<u8>)>, deadline: Option<Instant>) -> bool {
        loop {
            let received = match deadline {
                Some(deadline) => {
                    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                        Ok(chunk) => chunk,
                        Err(RecvTimeoutError::Disconnected) => return true,
                        Err(RecvTimeoutError::Timeout) => return false,
                    }
                }
                None => match rx.recv() {
                    Ok(chunk) => chunk,
                    Err(_) => return true,
                },
            };
            match received {
                (Stream::Stdout, chunk) => self.stdout.extend_from_slice(&chunk),
                (Stream::Stderr, chunk) => self.stderr.extend_from_slice(&chunk),
            }
        }
    }
}

fn wait_until(child: &mut Child, deadline: Instant) -> io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Forwards everything read from `pipe` to `tx`. The channel disconnects once every drain
/// thread reached the end of its pipe.
fn drain<R>(pipe: Option<R>, stream: Stream, tx: &Sender<(Stream, Vec<u8>)>)
where
    R: Read + Send + 'static,
{
    let Some(mut pipe) = pipe else { return };
    let tx = tx.clone();
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(len) => {
                    if tx.send((stream, buf[..len].to_vec())).is_err() {
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                // a read error only truncates the diagnostics
                Err(_) => break,
            }
        }
    });
}

/// Turns tool output into a printable string, escaping it if it is not valid UTF-8.
pub fn escape_output(s: &[u8]) -> String {
    std::str::from_utf8(s).map(|s| s.to_owned()).unwrap_or_else(|_| {
        let mut x = "Non-UTF-8 output: ".to_string();
        x.extend(s.iter().flat_map(|&b| ascii::escape_default(b)).map(char::from));
        x
    })
}
