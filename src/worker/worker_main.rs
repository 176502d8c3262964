//! Worker subprocess main entry point.
//!
//! This module runs when the program is launched with `role=worker`. It reads
//! framed JSON requests from stdin, hands each one to the user handler and
//! writes the serialized result to stdout with no framing.

use super::frame::{self, HEADER_LEN};
use super::ipc::PipeFd;
use crate::error::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// How long an idle worker sleeps between header polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exit code used when a request cannot be decoded or handled.
pub const EXIT_BAD_REQUEST: i32 = 2;

/// Type-erased request handler: request JSON in, response JSON out.
type Handler = Box<dyn FnMut(&[u8]) -> Result<Vec<u8>>>;

/// Configuration for the worker side of the pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between header polls when stdin has nothing to offer.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Worker-role controller.
///
/// Owns the user handler and runs the request loop until the master closes
/// stdin.
pub struct WorkerController {
    handler: Handler,
    config: WorkerConfig,
    served: u64,
}

impl WorkerController {
    /// Wrap a typed handler.
    ///
    /// The request is deserialized from the frame payload and the handler's
    /// return value is serialized as the response.
    pub fn new<Req, Resp, F>(mut handler: F) -> Self
    where
        Req: DeserializeOwned,
        Resp: Serialize,
        F: FnMut(Req) -> Resp + 'static,
    {
        let handler: Handler = Box::new(move |payload: &[u8]| -> Result<Vec<u8>> {
            let request: Req = serde_json::from_slice(payload)?;
            let response = handler(request);
            Ok(serde_json::to_vec(&response)?)
        });

        Self {
            handler,
            config: WorkerConfig::default(),
            served: 0,
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Number of requests answered so far.
    pub fn served(&self) -> u64 {
        self.served
    }

    /// Serve requests from `input` until end of file.
    ///
    /// `input` is switched to non-blocking mode for header polling. Headers
    /// that do not decode, or that announce an empty payload, are skipped.
    /// A payload that the handler cannot decode is returned as an error.
    pub fn serve<W: Write>(&mut self, input: &mut PipeFd, output: &mut W) -> Result<()> {
        input.set_nonblocking(true)?;

        let mut header = [0u8; HEADER_LEN];
        let mut filled = 0;

        loop {
            match input.try_read(&mut header[filled..])? {
                None => {
                    thread::sleep(self.config.poll_interval);
                    continue;
                }
                Some(0) => {
                    if filled > 0 {
                        warn!(bytes = filled, "stdin closed inside a frame header");
                    }
                    return Ok(());
                }
                Some(n) => filled += n,
            }

            if filled < HEADER_LEN {
                continue;
            }
            filled = 0;

            let len = match frame::decode_header(&header) {
                Some(0) => {
                    trace!("Skipping empty frame");
                    continue;
                }
                Some(len) => len,
                None => {
                    warn!(
                        header = %String::from_utf8_lossy(&header),
                        "Skipping undecodable frame header"
                    );
                    continue;
                }
            };

            let payload = read_payload(input, len)?;
            let response = (self.handler)(&payload)?;

            output.write_all(&response)?;
            output.flush()?;
            self.served += 1;
            trace!(request_bytes = len, response_bytes = response.len(), "Request served");
        }
    }

    /// Run the worker on this process's stdin and stdout.
    ///
    /// Never returns: exits 0 when the master closes stdin and
    /// [`EXIT_BAD_REQUEST`] on any failure.
    pub fn run(mut self) -> ! {
        // Ignore SIGPIPE - a vanished master surfaces as a write error
        unsafe {
            nix::sys::signal::signal(
                nix::sys::signal::Signal::SIGPIPE,
                nix::sys::signal::SigHandler::SigIgn,
            )
            .ok();
        }

        // Safety: file descriptors 0 and 1 are always valid for stdin/stdout
        let mut input = unsafe { PipeFd::from_raw(0) };
        let mut output = unsafe { PipeFd::from_raw(1) };

        debug!("Worker ready");

        match self.serve(&mut input, &mut output) {
            Ok(()) => {
                debug!(served = self.served, "stdin closed, worker exiting");
                std::process::exit(0)
            }
            Err(e) => {
                error!(error = %e, served = self.served, "Worker failed");
                std::process::exit(EXIT_BAD_REQUEST)
            }
        }
    }
}

impl std::fmt::Debug for WorkerController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerController")
            .field("config", &self.config)
            .field("served", &self.served)
            .finish_non_exhaustive()
    }
}

/// Read exactly `len` payload bytes, blocking until they arrive.
fn read_payload(input: &mut PipeFd, len: usize) -> Result<Vec<u8>> {
    input.set_nonblocking(false)?;
    let mut payload = vec![0u8; len];
    let read = input.read_exact(&mut payload);
    input.set_nonblocking(true)?;
    read?;
    Ok(payload)
}
