#![allow(dead_code)]

use std::{
    collections::{HashSet, VecDeque},
    io,
    path::PathBuf,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use sshkit::{
    error::TerminalError,
    filesystem::{RemoteEntry, RemoteFilesystem, RemoteReader, RemoteWriter},
    native::LocalRootFilesystem,
    session::{PtyRequest, RemoteSession, SessionEvent, SessionInput, SessionOpener},
    terminal::{LocalTerminal, RawModeGuard},
    Authenticator, ConnectOptions, Connection, Error,
};
use testcontainers::{core::ContainerPort, runners::AsyncRunner, ContainerAsync, GenericImage};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    sync::Notify,
};
use uuid::Uuid;

pub fn get_tmp_path() -> PathBuf {
    PathBuf::from(format!("/tmp/{}", Uuid::new_v4()))
}

/// An in-memory sink that can be inspected after it was handed off as a boxed writer.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    data: Arc<Mutex<Vec<u8>>>,
    shut_down: Arc<Notify>,
}

impl SharedBuffer {
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.contents()).unwrap()
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.data.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shut_down.notify_one();
        Poll::Ready(Ok(()))
    }
}

/// Everything a scripted session was asked to do.
#[derive(Debug, Default)]
pub struct SessionLog {
    pub envs: Vec<(String, String)>,
    pub execs: Vec<String>,
    pub ptys: Vec<PtyRequest>,
    pub shells: usize,
    pub opened: usize,
    pub closed: usize,
}

/// Hands out sessions that replay a fixed list of events.
#[derive(Clone, Default)]
pub struct ScriptedOpener {
    pub events: Vec<SessionEvent>,
    /// Request name the fake server refuses, e.g. `"pty-req"`.
    pub reject: Option<&'static str>,
    /// Hold back events until the remote stdin has been shut down.
    pub await_stdin_eof: bool,
    pub log: Arc<Mutex<SessionLog>>,
    pub stdin: SharedBuffer,
}

impl ScriptedOpener {
    pub fn new(events: Vec<SessionEvent>) -> ScriptedOpener {
        ScriptedOpener {
            events,
            ..Default::default()
        }
    }

    pub fn exiting_with(status: u32) -> ScriptedOpener {
        ScriptedOpener::new(vec![SessionEvent::Eof, SessionEvent::ExitStatus(status)])
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, SessionLog> {
        self.log.lock().unwrap()
    }
}

#[async_trait]
impl SessionOpener for ScriptedOpener {
    async fn open_session(&self) -> sshkit::Result<Box<dyn RemoteSession>> {
        self.log().opened += 1;
        Ok(Box::new(ScriptedSession {
            events: self.events.clone().into(),
            reject: self.reject,
            await_stdin_eof: self.await_stdin_eof,
            log: self.log.clone(),
            stdin: self.stdin.clone(),
        }))
    }
}

struct ScriptedSession {
    events: VecDeque<SessionEvent>,
    reject: Option<&'static str>,
    await_stdin_eof: bool,
    log: Arc<Mutex<SessionLog>>,
    stdin: SharedBuffer,
}

impl ScriptedSession {
    fn check(&self, request: &'static str) -> sshkit::Result<()> {
        match self.reject {
            Some(rejected) if rejected == request => Err(Error::RequestRejected { request }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    async fn set_env(&mut self, name: &str, value: &str) -> sshkit::Result<()> {
        self.check("env")?;
        self.log.lock().unwrap().envs.push((name.into(), value.into()));
        Ok(())
    }

    async fn request_pty(&mut self, request: &PtyRequest) -> sshkit::Result<()> {
        self.check("pty-req")?;
        self.log.lock().unwrap().ptys.push(request.clone());
        Ok(())
    }

    async fn exec(&mut self, command: &str) -> sshkit::Result<()> {
        self.check("exec")?;
        self.log.lock().unwrap().execs.push(command.into());
        Ok(())
    }

    async fn request_shell(&mut self) -> sshkit::Result<()> {
        self.check("shell")?;
        self.log.lock().unwrap().shells += 1;
        Ok(())
    }

    fn input(&self) -> SessionInput {
        Box::new(self.stdin.clone())
    }

    async fn next_event(&mut self) -> Option<SessionEvent> {
        if self.await_stdin_eof {
            self.await_stdin_eof = false;
            self.stdin.shut_down.notified().await;
        }
        self.events.pop_front()
    }

    async fn close(&mut self) -> sshkit::Result<()> {
        self.log.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// A terminal that only counts raw mode transitions.
#[derive(Default)]
pub struct FakeTerminal {
    pub entered: Arc<AtomicUsize>,
    pub restored: Arc<AtomicUsize>,
}

impl LocalTerminal for FakeTerminal {
    fn size(&self) -> Result<(u16, u16), TerminalError> {
        Ok((120, 40))
    }

    fn enter_raw_mode(&self) -> Result<RawModeGuard, TerminalError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let restored = self.restored.clone();
        Ok(RawModeGuard::new(move || {
            restored.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
    }
}

/// A [`LocalRootFilesystem`] that fails reads of chosen paths and records its load.
pub struct FlakyFilesystem {
    inner: LocalRootFilesystem,
    failing_reads: HashSet<String>,
    pub created_dirs: AtomicUsize,
    open_readers: Arc<AtomicUsize>,
    pub peak_readers: Arc<AtomicUsize>,
}

impl FlakyFilesystem {
    pub fn new(root: impl Into<PathBuf>) -> FlakyFilesystem {
        FlakyFilesystem {
            inner: LocalRootFilesystem::new(root),
            failing_reads: HashSet::new(),
            created_dirs: AtomicUsize::new(0),
            open_readers: Arc::new(AtomicUsize::new(0)),
            peak_readers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fail_reads_of(mut self, path: &str) -> FlakyFilesystem {
        self.failing_reads.insert(path.into());
        self
    }

    pub fn created_dirs(&self) -> usize {
        self.created_dirs.load(Ordering::SeqCst)
    }

    pub fn peak_readers(&self) -> usize {
        self.peak_readers.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteFilesystem for FlakyFilesystem {
    async fn exists(&self, path: &str) -> io::Result<bool> {
        self.inner.exists(path).await
    }

    async fn create_dir(&self, path: &str) -> io::Result<()> {
        self.created_dirs.fetch_add(1, Ordering::SeqCst);
        self.inner.create_dir(path).await
    }

    async fn read_dir(&self, path: &str) -> io::Result<Vec<RemoteEntry>> {
        self.inner.read_dir(path).await
    }

    async fn open_read(&self, path: &str) -> io::Result<RemoteReader> {
        if self.failing_reads.contains(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "injected read failure"));
        }
        let reader = self.inner.open_read(path).await?;
        let open = self.open_readers.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_readers.fetch_max(open, Ordering::SeqCst);
        // widen the window in which concurrent copies would overlap
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok(Box::new(TrackedReader {
            inner: reader,
            open_readers: self.open_readers.clone(),
        }))
    }

    async fn open_write_truncate(&self, path: &str) -> io::Result<RemoteWriter> {
        self.inner.open_write_truncate(path).await
    }
}

struct TrackedReader {
    inner: RemoteReader,
    open_readers: Arc<AtomicUsize>,
}

impl AsyncRead for TrackedReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Drop for TrackedReader {
    fn drop(&mut self) {
        self.open_readers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Deterministic filler so round-trip failures are reproducible.
pub fn pseudo_random_bytes(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x9e37_79b9;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

/// A live connection to the `ssh_server` test image.
pub struct TestData {
    pub connection: Connection,
    _container: ContainerAsync<GenericImage>,
}

impl TestData {
    pub async fn setup() -> TestData {
        let container = GenericImage::new("ssh_server", "latest")
            .with_exposed_port(ContainerPort::Tcp(22))
            .start()
            .await
            .expect("Could not start SSH container");
        let ports = container
            .ports()
            .await
            .expect("Could not get SSH container ports");
        let ssh_port = ports
            .map_to_host_port_ipv4(ContainerPort::Tcp(22))
            .expect("Could not get SSH container port corresponding to 22");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut options = ConnectOptions::new("localhost", "root", Authenticator::password("root123"));
        options.port(ssh_port);
        let connection = Connection::connect(options).await.expect("Could not connect");

        TestData {
            connection,
            _container: container,
        }
    }
}
