//! Supervision of a long-running `--watch` build.
//!
//! The build tool runs as a child process with all three stdio streams piped. Two reader
//! threads forward output chunks to a supervisor thread, which classifies each chunk
//! (see [`output`]) and either runs the rebuild callback or logs a diagnostic.
//!
//! The tool gets a process group of its own (see [`process`]). `close` sends SIGTERM to the
//! whole group, SIGKILLs whatever is left after a grace period, and joins the threads.
//! Dropping an open watcher closes it. Watchers still open when the host calls
//! `exit` are killed from an atexit hook on unix; on Windows `Drop` is the only hook, and
//! the tree is killed with `taskkill /T`.

pub mod output;
mod process;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::build_tool::{self, BuildTool};
use crate::error::{AssetError, Result};
use output::OutputKind;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const READ_BUF: usize = 8 * 1024;
/// How long `close` waits for the output readers to see EOF before detaching them.
const READER_JOIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn name(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

struct Chunk {
    stream: Stream,
    text: String,
}

pub struct BuildWatcher {
    child: Arc<Mutex<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    closed: Arc<AtomicBool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    pid: u32,
    outdir: PathBuf,
}

impl std::fmt::Debug for BuildWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildWatcher")
            .field("pid", &self.pid)
            .field("outdir", &self.outdir)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl BuildWatcher {
    /// Start `tool build <entrypoint> --outdir <outdir> --watch` in `root` and call
    /// `after_rebuild` whenever its output reports a rebuilt file. The callback runs on
    /// the supervisor thread, one call at a time.
    pub fn watch<F>(
        tool: &BuildTool,
        root: &Path,
        entrypoint: &Path,
        outdir: &Path,
        after_rebuild: F,
    ) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        build_tool::check_inputs(root, entrypoint)?;
        let outdir = build_tool::absolute_outdir(root, outdir);
        std::fs::create_dir_all(&outdir)?;

        let mut cmd = tool.command(root, entrypoint, &outdir, true);
        process::isolate(&mut cmd);
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| AssetError::ProcessSpawn {
                program: tool.display_name(),
                source,
            })?;
        let pid = child.id();
        tracing::info!(pid, tool = %tool.display_name(), outdir = %outdir.display(), "build watcher started");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let child = Arc::new(Mutex::new(child));
        let closed = Arc::new(AtomicBool::new(false));

        let (tx, rx) = mpsc::channel();
        let threads = (|| -> std::io::Result<(JoinHandle<()>, Vec<JoinHandle<()>>)> {
            let mut readers = Vec::with_capacity(2);
            if let Some(stdout) = stdout {
                readers.push(spawn_reader(stdout, Stream::Stdout, tx.clone())?);
            }
            if let Some(stderr) = stderr {
                readers.push(spawn_reader(stderr, Stream::Stderr, tx)?);
            }
            let child = child.clone();
            let closed = closed.clone();
            let outdir = outdir.clone();
            let supervisor = thread::Builder::new()
                .name("assetry-build-watch".into())
                .spawn(move || supervise(rx, child, closed, outdir, after_rebuild))?;
            Ok((supervisor, readers))
        })();
        let (supervisor, readers) = match threads {
            Ok(threads) => threads,
            Err(e) => {
                process::terminate(&child);
                return Err(e.into());
            }
        };
        process::register(pid);

        Ok(Self {
            child,
            stdin: Mutex::new(stdin),
            closed,
            supervisor: Mutex::new(Some(supervisor)),
            readers: Mutex::new(readers),
            pid,
            outdir,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn outdir(&self) -> &Path {
        &self.outdir
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop the build process and the supervisor. No callback runs after this returns.
    /// Calling it a second time is an error. Safe to call from inside the callback.
    pub fn close(&self) -> Result<()> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AssetError::AlreadyClosed);
        }
        drop(self.stdin.lock().unwrap_or_else(|e| e.into_inner()).take());
        process::terminate(&self.child);
        process::unregister(self.pid);

        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            // Closing from the callback: the supervisor sees the flag and exits on its own.
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::warn!(pid = self.pid, "build watcher thread panicked");
            }
        }
        let readers = std::mem::take(&mut *self.readers.lock().unwrap_or_else(|e| e.into_inner()));
        join_readers(readers, self.pid);
        tracing::info!(pid = self.pid, "build watcher closed");
        Ok(())
    }
}

impl Drop for BuildWatcher {
    fn drop(&mut self) {
        if !self.is_closed() {
            let _ = self.close();
        }
    }
}

/// Join the output readers. With the whole group gone they hit EOF at once; a reader
/// still blocked after the grace period (a stray process kept the pipe open) is detached.
fn join_readers(readers: Vec<JoinHandle<()>>, pid: u32) {
    let deadline = Instant::now() + READER_JOIN_GRACE;
    for handle in readers {
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            tracing::warn!(pid, thread = ?handle.thread().name(), "output reader still blocked; detaching");
        }
    }
}

fn spawn_reader<R>(mut source: R, stream: Stream, tx: Sender<Chunk>) -> std::io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("assetry-build-{}", stream.name()))
        .spawn(move || {
            let mut buf = [0u8; READ_BUF];
            loop {
                match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                        if tx.send(Chunk { stream, text }).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        })
}

fn supervise<F>(
    rx: Receiver<Chunk>,
    child: Arc<Mutex<Child>>,
    closed: Arc<AtomicBool>,
    outdir: PathBuf,
    mut after_rebuild: F,
) where
    F: FnMut(),
{
    loop {
        if closed.load(Ordering::SeqCst) {
            return;
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(chunk) => {
                if closed.load(Ordering::SeqCst) {
                    return;
                }
                dispatch(&chunk, &outdir, &mut after_rebuild);
            }
            Err(RecvTimeoutError::Timeout) => {
                if let Some(status) = exited(&child) {
                    // Deliver whatever the readers already queued before reporting.
                    for chunk in rx.try_iter() {
                        if closed.load(Ordering::SeqCst) {
                            return;
                        }
                        dispatch(&chunk, &outdir, &mut after_rebuild);
                    }
                    tracing::warn!(%status, "build tool exited");
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                if !closed.load(Ordering::SeqCst) {
                    tracing::warn!("build tool closed its output streams");
                }
                return;
            }
        }
    }
}

fn dispatch<F: FnMut()>(chunk: &Chunk, outdir: &Path, after_rebuild: &mut F) {
    match output::classify(&chunk.text, outdir) {
        OutputKind::Rebuilt => {
            tracing::debug!(stream = chunk.stream.name(), "rebuild reported");
            after_rebuild();
        }
        OutputKind::Diagnostic => {
            tracing::warn!(stream = chunk.stream.name(), "{}", chunk.text.trim_end());
        }
        OutputKind::Blank => {}
    }
}

fn exited(child: &Mutex<Child>) -> Option<std::process::ExitStatus> {
    child
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .try_wait()
        .ok()
        .flatten()
}
