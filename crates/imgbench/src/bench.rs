//! # Benchmark Runs
//!
//! Times the average filter on the calling thread and through the image
//! worker, on the same synthetic input, and fingerprints each output so the
//! two can be compared.

use std::fmt;
use std::time::Duration;
use std::time::Instant;

use thiserror::Error;
use workrpc::ObjectId;
use workrpc::progress;
use workrpc::worker;

use crate::config::BenchConfig;
use crate::config::Mode;
use crate::image::ImageError;
use crate::image::ImageObject;
use crate::image::buffer_len;
use crate::service::ImageObjectService;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Rpc(#[from] workrpc::Error),
    #[error(transparent)]
    Spawn(#[from] worker::Error),
    #[error("worker run did not finish within {0:?}")]
    Timeout(Duration),
    #[error("worker returned a {found_width}x{found_height} image, sent {width}x{height}")]
    DimensionsChanged {
        width: u32,
        height: u32,
        found_width: u32,
        found_height: u32,
    },
    #[error("plain and worker outputs differ: {plain:016x} vs {worker:016x}")]
    Mismatch { plain: u64, worker: u64 },
}

pub type Result<T> = std::result::Result<T, BenchError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchReport {
    pub mode: Mode,
    pub elapsed: Duration,
    /// FNV-1a of the filtered buffer.
    pub checksum: u64,
    /// Progress values observed; always zero for plain runs.
    pub progress_events: u64,
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<6} {:>10.3} ms  checksum {:016x}  progress {}",
            self.mode,
            self.elapsed.as_secs_f64() * 1000.0,
            self.checksum,
            self.progress_events
        )
    }
}

/// 64-bit FNV-1a.
pub fn checksum(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    bytes
        .iter()
        .fold(OFFSET, |hash, &b| (hash ^ u64::from(b)).wrapping_mul(PRIME))
}

/// A deterministic RGBA test card: gradients on red and green, a checker on
/// blue, half-transparent alpha so the filter's alpha rule is visible.
pub fn synthetic_image(width: u32, height: u32) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(buffer_len(width, height)?);
    for y in 0..height {
        for x in 0..width {
            let r = (u64::from(x) * 255 / u64::from(width.max(2) - 1)) as u8;
            let g = (u64::from(y) * 255 / u64::from(height.max(2) - 1)) as u8;
            let b = if (x / 8 + y / 8) % 2 == 0 { 230 } else { 25 };
            buffer.extend_from_slice(&[r, g, b, 128]);
        }
    }
    Ok(buffer)
}

/// Filters on the calling thread.
pub fn run_plain(width: u32, height: u32, iterations: u32) -> Result<BenchReport> {
    let buffer = synthetic_image(width, height)?;

    let started = Instant::now();
    let mut image = ImageObject::new(width, height, buffer)?;
    image.average_filter(iterations);
    let (_, _, output) = image.into_parts();
    let elapsed = started.elapsed();

    Ok(BenchReport {
        mode: Mode::Plain,
        elapsed,
        checksum: checksum(&output),
        progress_events: 0,
    })
}

/// Filters through the worker, following progress until the last pass, then
/// transfers the image back.
pub async fn run_worker(
    service: &ImageObjectService,
    width: u32,
    height: u32,
    iterations: u32,
    timeout: Duration,
    progress_capacity: usize,
) -> Result<BenchReport> {
    let buffer = synthetic_image(width, height)?;

    let started = Instant::now();
    let id = service.create(width, height, buffer).await?;
    let (sink, mut stream) = progress::channel(progress_capacity);

    let filter = service.apply_average_filter(id, iterations, Some(sink));
    let follow = async {
        let step = u64::from(iterations / 10).max(1);
        let max = u64::from(iterations);
        let mut seen = 0u64;
        while let Some(progress) = stream.next().await {
            seen += 1;
            if progress.value == max {
                tracing::info!(%id, passes = progress.value, "filter finished, transferring back");
            } else if progress.value % step == 0 {
                tracing::debug!(%id, passes = progress.value, of = max, "filter progress");
            }
        }
        seen
    };

    let joined = tokio::time::timeout(timeout, async { tokio::join!(filter, follow) }).await;
    let (filtered, progress_events) = match joined {
        Ok(joined) => joined,
        Err(_) => {
            tracing::warn!(%id, ?timeout, "worker run timed out");
            discard(service, id).await;
            return Err(BenchError::Timeout(timeout));
        }
    };
    if let Err(e) = filtered {
        discard(service, id).await;
        return Err(e.into());
    }

    let contents = service.transfer(id).await?;
    let elapsed = started.elapsed();

    if (contents.width, contents.height) != (width, height) {
        return Err(BenchError::DimensionsChanged {
            width,
            height,
            found_width: contents.width,
            found_height: contents.height,
        });
    }

    Ok(BenchReport {
        mode: Mode::Worker,
        elapsed,
        checksum: checksum(&contents.buffer),
        progress_events,
    })
}

/// Deletes an image a failed run leaves behind in the worker.
async fn discard(service: &ImageObjectService, id: ObjectId) {
    match service.delete(id).await {
        Ok(()) | Err(workrpc::Error::UnknownIdentifier(_)) => {}
        Err(e) => tracing::warn!(%id, error = %e, "could not delete image after failed run"),
    }
}

/// Runs every mode `config` asks for. With both, fails unless the outputs agree.
pub async fn run(config: &BenchConfig) -> Result<Vec<BenchReport>> {
    tracing::info!(
        width = config.width,
        height = config.height,
        iterations = config.iterations,
        mode = %config.mode,
        "starting benchmark"
    );

    let mut reports = Vec::new();
    if config.mode.runs_plain() {
        reports.push(run_plain(config.width, config.height, config.iterations)?);
    }

    if config.mode.runs_worker() {
        let (service, handle) = ImageObjectService::spawn(config.worker_config())?;
        let report = run_worker(
            &service,
            config.width,
            config.height,
            config.iterations,
            config.timeout(),
            config.progress_capacity,
        )
        .await;

        let dropped = service.inner().dropped_progress();
        if dropped > 0 {
            tracing::warn!(dropped, "progress values were dropped");
        }
        drop(service);
        match tokio::task::spawn_blocking(move || handle.shutdown()).await {
            Ok(Some(shutdown)) => tracing::debug!(
                handled = shutdown.handled,
                live_objects = shutdown.live_objects,
                "worker shut down"
            ),
            _ => tracing::warn!("worker did not shut down cleanly"),
        }
        reports.push(report?);
    }

    if let [plain, offloaded] = reports.as_slice() {
        if plain.checksum != offloaded.checksum {
            return Err(BenchError::Mismatch {
                plain: plain.checksum,
                worker: offloaded.checksum,
            });
        }
    }

    Ok(reports)
}
