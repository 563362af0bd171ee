//! External raster conversion.
//!
//! Rasterizes formats the in-process decoder cannot handle (SVG and friends)
//! by piping them through an ImageMagick-compatible `convert` executable.
//! The process runs under a hard wall-clock budget and is killed when the
//! budget runs out.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::Config;
use crate::storage::BlobReader;

/// Errors from [`ImageConverter`].
#[derive(Debug, Error)]
pub enum ConvertError {
    /// No converter executable is configured.
    #[error("Image conversion is not available")]
    Unavailable,

    /// Requested output box is empty.
    #[error("Invalid output size {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// The converter rejected the input.
    #[error("Converter could not process the input (exit code {code:?})")]
    UnsupportedInput { code: Option<i32> },

    /// The invocation ran past its budget.
    #[error("Conversion timed out after {0:?}")]
    Timeout(Duration),

    /// Spawning or talking to the process failed.
    #[error("Converter failed: {0}")]
    Internal(String),
}

/// Exit status of a converter process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl ProcessExit {
    #[must_use]
    pub const fn success(self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Writable end of a process's stdin.
pub type ProcessInput = Pin<Box<dyn AsyncWrite + Send>>;

/// A running converter process.
#[async_trait]
pub trait ConverterProcess: Send {
    fn take_stdin(&mut self) -> Option<ProcessInput>;

    fn take_stdout(&mut self) -> Option<BlobReader>;

    async fn wait(&mut self) -> io::Result<ProcessExit>;

    /// Terminate the process and reap it.
    async fn kill(&mut self) -> io::Result<()>;
}

/// Starts converter processes.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, program: &Path, args: &[String]) -> io::Result<Box<dyn ConverterProcess>>;
}

/// Spawns real child processes through `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl ProcessSpawner for TokioSpawner {
    fn spawn(&self, program: &Path, args: &[String]) -> io::Result<Box<dyn ConverterProcess>> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        Ok(Box::new(ChildProcess(child)))
    }
}

struct ChildProcess(Child);

#[async_trait]
impl ConverterProcess for ChildProcess {
    fn take_stdin(&mut self) -> Option<ProcessInput> {
        self.0.stdin.take().map(|s| Box::pin(s) as ProcessInput)
    }

    fn take_stdout(&mut self) -> Option<BlobReader> {
        self.0.stdout.take().map(|s| Box::pin(s) as BlobReader)
    }

    async fn wait(&mut self) -> io::Result<ProcessExit> {
        let status = self.0.wait().await?;
        Ok(ProcessExit {
            code: status.code(),
        })
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.0.kill().await
    }
}

/// Arguments for fitting the input into `max_width`x`max_height` and writing
/// PNG to stdout.
fn convert_args(max_width: u32, max_height: u32) -> Vec<String> {
    vec![
        "-resize".to_string(),
        format!("{max_width}x{max_height}"),
        "-background".to_string(),
        "none".to_string(),
        "-".to_string(),
        "png:-".to_string(),
    ]
}

/// Converts images to PNG with an external executable.
#[derive(Clone)]
pub struct ImageConverter {
    program: Option<PathBuf>,
    timeout: Duration,
    spawner: Arc<dyn ProcessSpawner>,
}

impl std::fmt::Debug for ImageConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageConverter")
            .field("program", &self.program)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ImageConverter {
    #[must_use]
    pub fn new(program: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            program,
            timeout,
            spawner: Arc::new(TokioSpawner),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.image_converter_path.clone(),
            config.image_converter_timeout,
        )
    }

    /// A converter that fails every call with [`ConvertError::Unavailable`].
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(None, Duration::ZERO)
    }

    /// Replace the process spawner.
    #[must_use]
    pub fn with_spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Convert `source` to a PNG no larger than `max_width`x`max_height`.
    ///
    /// The budget covers the whole invocation: spawning, feeding the input,
    /// reading the output and waiting for exit.
    #[tracing::instrument(skip(self, source))]
    pub async fn convert_to_png<R>(
        &self,
        source: R,
        max_width: u32,
        max_height: u32,
    ) -> Result<Vec<u8>, ConvertError>
    where
        R: AsyncRead + Send + Unpin,
    {
        let program = self.program.as_deref().ok_or(ConvertError::Unavailable)?;
        if max_width == 0 || max_height == 0 {
            return Err(ConvertError::InvalidDimensions {
                width: max_width,
                height: max_height,
            });
        }

        let deadline = Instant::now() + self.timeout;
        let mut process = self
            .spawner
            .spawn(program, &convert_args(max_width, max_height))
            .map_err(|e| ConvertError::Internal(format!("spawn failed: {e}")))?;

        let run = tokio::time::timeout_at(deadline, drive(process.as_mut(), source)).await;
        match run {
            Ok(result) => result,
            Err(_) => {
                if let Err(e) = process.kill().await {
                    warn!(error = %e, "Failed to kill timed out converter");
                }
                warn!(timeout = ?self.timeout, "Image conversion timed out");
                Err(ConvertError::Timeout(self.timeout))
            }
        }
    }
}

/// Feed `source` to the process while collecting its output, then classify
/// the exit status.
async fn drive<R>(process: &mut dyn ConverterProcess, mut source: R) -> Result<Vec<u8>, ConvertError>
where
    R: AsyncRead + Send + Unpin,
{
    let mut stdin = process
        .take_stdin()
        .ok_or_else(|| ConvertError::Internal("converter stdin not piped".to_string()))?;
    let mut stdout = process
        .take_stdout()
        .ok_or_else(|| ConvertError::Internal("converter stdout not piped".to_string()))?;

    // Both directions run together; writing everything before reading would
    // deadlock once the process fills its stdout pipe.
    let feed = async {
        let copied = tokio::io::copy(&mut source, &mut stdin).await;
        // Close stdin so the process sees end of input
        let _ = stdin.shutdown().await;
        drop(stdin);
        copied
    };
    let drain = async {
        let mut output = Vec::new();
        stdout.read_to_end(&mut output).await.map(|_| output)
    };
    let (fed, drained) = tokio::join!(feed, drain);

    match fed {
        Ok(bytes) => debug!(bytes, "Converter input written"),
        // The process may exit without consuming all of its input; its exit
        // status decides the outcome
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            debug!("Converter closed its input early");
        }
        Err(e) => return Err(ConvertError::Internal(format!("input copy failed: {e}"))),
    }

    let output = drained.map_err(|e| ConvertError::Internal(format!("output read failed: {e}")))?;

    let exit = process
        .wait()
        .await
        .map_err(|e| ConvertError::Internal(format!("wait failed: {e}")))?;

    if !exit.success() {
        return Err(ConvertError::UnsupportedInput { code: exit.code });
    }

    Ok(output)
}
