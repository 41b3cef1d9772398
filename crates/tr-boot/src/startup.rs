//! Startup sequence
//!
//! Order matters: nothing may follow a pointer in data before relocation,
//! and the semaphore table must have its diagnostics routed to the final
//! stdio before `main` runs.

use crate::context::ExecutionContext;
use crate::reloc;
use parking_lot::Mutex;
use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tr_core::{BootError, Config, DiagnosticSink, LogBuffer};
use tr_pthread::ObjectTable;
use tracing::{debug, info, warn};

/// argv used when no loader context is supplied
pub const CONTEXTLESS_ARGV0: &str = "contextless";

/// Services the startup sequence needs from the kernel
pub trait Platform {
    /// Reserve the heap; returns its base address
    fn set_heap_size(&mut self, size: u64) -> Result<u64, BootError>;

    /// Open a socket to the stdout server
    fn connect_stdout(&mut self, server: &str) -> Option<i32>;

    /// Stdio backed by an already connected socket
    fn socket_stdio(&mut self, socket: i32) -> Option<Arc<dyn DiagnosticSink>>;

    /// Tear down the network session
    fn finalize_bsd(&mut self);
}

/// Where stdout/stderr ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioKind {
    Socket,
    LogBuffer,
}

/// Module image to relocate
#[derive(Debug)]
pub struct Image<'a> {
    pub bytes: &'a mut [u8],
    pub dynamic_offset: usize,
    pub base: u64,
}

/// Run the startup sequence, then `main`
///
/// `main` receives the argument vector, the stdio sink and which kind of
/// stdio was chosen. The return value is `main`'s, or the startup failure
/// code from [`BootError::exit_code`].
pub fn start<P, F>(
    ctx: Option<&mut ExecutionContext>,
    image: Image<'_>,
    platform: &mut P,
    config: &Config,
    table: &ObjectTable,
    main: F,
) -> i32
where
    P: Platform,
    F: FnOnce(&[String], &Arc<dyn DiagnosticSink>, StdioKind) -> i32,
{
    match run(ctx, image, platform, config, table, main) {
        Ok(code) => code,
        Err(e) => {
            warn!("Startup failed: {}", e);
            e.exit_code()
        }
    }
}

fn run<P, F>(
    ctx: Option<&mut ExecutionContext>,
    image: Image<'_>,
    platform: &mut P,
    config: &Config,
    table: &ObjectTable,
    main: F,
) -> Result<i32, BootError>
where
    P: Platform,
    F: FnOnce(&[String], &Arc<dyn DiagnosticSink>, StdioKind) -> i32,
{
    reloc::relocate(image.bytes, image.dynamic_offset, image.base)?;
    debug!("Image base: 0x{:x}", image.base);

    let mut contextless = ExecutionContext::empty();
    let ctx = match ctx {
        Some(ctx) => {
            debug!("Found context");
            ctx.validate()?;
            ctx
        }
        None => {
            debug!("No context");
            setup_contextless(&mut contextless, platform, config)?;
            &mut contextless
        }
    };

    let log = Arc::new(LogBuffer::new(config.sync.diag_buffer_size));
    let uses_socket = ctx.has_bsd && ctx.std_socket > 0;

    let socket_stdio = if uses_socket {
        let stdio = platform.socket_stdio(ctx.std_socket);
        if stdio.is_none() {
            warn!("Could not set up socket {} for stdio", ctx.std_socket);
        }
        stdio
    } else {
        None
    };
    let (stdio, kind) = match socket_stdio {
        Some(stdio) => (stdio, StdioKind::Socket),
        None => (Arc::clone(&log) as Arc<dyn DiagnosticSink>, StdioKind::LogBuffer),
    };
    debug!("Using {:?} stdio", kind);
    table.set_diagnostics(Arc::clone(&stdio));

    let code = main(&ctx.argv, &stdio, kind);

    ctx.log_length = log.len();
    if uses_socket && config.boot.finalize_bsd {
        platform.finalize_bsd();
    }

    Ok(code)
}

fn setup_contextless<P: Platform>(
    ctx: &mut ExecutionContext,
    platform: &mut P,
    config: &Config,
) -> Result<(), BootError> {
    ctx.argv = vec![CONTEXTLESS_ARGV0.to_string()];
    ctx.mem_base = platform.set_heap_size(config.boot.heap_size)?;
    ctx.mem_size = config.boot.heap_size;

    let server = &config.boot.stdout_server;
    if !server.is_empty() {
        match platform.connect_stdout(server) {
            Some(socket) => {
                ctx.std_socket = socket;
                ctx.has_bsd = true;
            }
            None => debug!("Stdout server {} not reachable", server),
        }
    }
    Ok(())
}

/// Writes stdio to a connected stream
struct SocketStdio {
    stream: Mutex<TcpStream>,
}

impl DiagnosticSink for SocketStdio {
    fn write(&self, text: &str) {
        let _ = self.stream.lock().write_all(text.as_bytes());
    }
}

/// [`Platform`] for running on a regular OS
#[derive(Debug, Default)]
pub struct HostPlatform {
    heap: Vec<u8>,
    sockets: Vec<TcpStream>,
    connect_timeout: Option<Duration>,
}

impl HostPlatform {
    const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Bytes currently reserved for the heap
    pub fn heap_size(&self) -> usize {
        self.heap.len()
    }

    fn socket(&self, socket: i32) -> Option<&TcpStream> {
        let index = usize::try_from(socket).ok()?.checked_sub(1)?;
        self.sockets.get(index)
    }
}

impl Platform for HostPlatform {
    fn set_heap_size(&mut self, size: u64) -> Result<u64, BootError> {
        let len = usize::try_from(size).map_err(|_| BootError::Heap(size))?;
        let mut heap = Vec::new();
        heap.try_reserve_exact(len).map_err(|_| BootError::Heap(size))?;
        heap.resize(len, 0);
        self.heap = heap;

        info!("Heap of 0x{:x} bytes reserved", size);
        Ok(self.heap.as_ptr() as u64)
    }

    fn connect_stdout(&mut self, server: &str) -> Option<i32> {
        let addr = server.to_socket_addrs().ok()?.next()?;
        let timeout = self.connect_timeout.unwrap_or(Self::DEFAULT_CONNECT_TIMEOUT);
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                self.sockets.push(stream);
                i32::try_from(self.sockets.len()).ok()
            }
            Err(e) => {
                debug!("Connecting to {} failed: {}", server, e);
                None
            }
        }
    }

    fn socket_stdio(&mut self, socket: i32) -> Option<Arc<dyn DiagnosticSink>> {
        let stream = self.socket(socket)?.try_clone().ok()?;
        Some(Arc::new(SocketStdio {
            stream: Mutex::new(stream),
        }))
    }

    fn finalize_bsd(&mut self) {
        for stream in self.sockets.drain(..) {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }
}
