//! # Image Object Service
//!
//! Consumer-facing API for images held by a worker. A thin, typed wrapper
//! around [`Service<ImageFamily>`]; all bookkeeping happens there.

use workrpc::ObjectId;
use workrpc::ProgressSink;
use workrpc::Result;
use workrpc::Service;
use workrpc::WorkerConfig;
use workrpc::WorkerHandle;
use workrpc::worker;

use crate::family::CreateImage;
use crate::family::ImageContents;
use crate::family::ImageFamily;
use crate::family::ImageOp;

pub struct ImageObjectService {
    inner: Service<ImageFamily>,
}

impl ImageObjectService {
    pub fn new(inner: Service<ImageFamily>) -> Self {
        Self { inner }
    }

    /// Starts an image worker and returns the service bound to it.
    pub fn spawn(config: WorkerConfig) -> worker::Result<(Self, WorkerHandle<ImageFamily>)> {
        let (inner, handle) = workrpc::spawn(ImageFamily, config)?;
        Ok((Self::new(inner), handle))
    }

    /// Moves `buffer` into a new worker-side image.
    pub async fn create(&self, width: u32, height: u32, buffer: Vec<u8>) -> Result<ObjectId> {
        self.inner.create(CreateImage { width, height, buffer }).await
    }

    /// Filters the image in place. Progress counts finished passes, ending at
    /// `iterations`.
    pub async fn apply_average_filter(
        &self,
        id: ObjectId,
        iterations: u32,
        progress: Option<ProgressSink>,
    ) -> Result<()> {
        self.inner
            .invoke(id, ImageOp::AverageFilter { iterations }, progress)
            .await
    }

    pub async fn delete(&self, id: ObjectId) -> Result<()> {
        self.inner.delete(id).await
    }

    /// Moves the image back out of the worker. `id` is invalid afterwards.
    pub async fn transfer(&self, id: ObjectId) -> Result<ImageContents> {
        self.inner.transfer(id).await
    }

    pub fn inner(&self) -> &Service<ImageFamily> {
        &self.inner
    }
}
