//! The image family: how image objects are built, filtered and handed back.

use workrpc::Family;
use workrpc::FamilyError;
use workrpc::Operation;
use workrpc::ProgressEmitter;

use crate::image::ImageError;
use crate::image::ImageObject;

/// Largest iteration count a single filter request accepts.
pub const MAX_ITERATIONS: u32 = 500;

pub struct ImageFamily;

/// Constructor arguments. The buffer is moved into the worker.
#[derive(Debug)]
pub struct CreateImage {
    pub width: u32,
    pub height: u32,
    pub buffer: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOp {
    /// Runs `iterations` box-filter passes, reporting each finished pass.
    AverageFilter { iterations: u32 },
}

impl Operation for ImageOp {
    fn tag(&self) -> &'static str {
        match self {
            Self::AverageFilter { .. } => "apply-average-filter",
        }
    }

    fn progress_max(&self) -> Option<u64> {
        match self {
            Self::AverageFilter { iterations } => Some(u64::from(*iterations)),
        }
    }
}

/// What a transfer returns: the image's own buffer, not a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageContents {
    pub width: u32,
    pub height: u32,
    pub buffer: Vec<u8>,
}

impl From<ImageError> for FamilyError {
    fn from(e: ImageError) -> Self {
        FamilyError::new(e.to_string())
    }
}

impl Family for ImageFamily {
    const NAME: &'static str = "image";
    type Args = CreateImage;
    type Op = ImageOp;
    type Output = ();
    type Contents = ImageContents;
    type Object = ImageObject;

    fn create(&mut self, args: CreateImage) -> Result<ImageObject, FamilyError> {
        Ok(ImageObject::new(args.width, args.height, args.buffer)?)
    }

    fn apply(
        &mut self,
        image: &mut ImageObject,
        op: ImageOp,
        progress: &mut ProgressEmitter<'_>,
    ) -> Result<(), FamilyError> {
        match op {
            ImageOp::AverageFilter { iterations } => {
                if iterations > MAX_ITERATIONS {
                    return Err(FamilyError::new(format!(
                        "{iterations} iterations requested, at most {MAX_ITERATIONS} allowed"
                    )));
                }
                tracing::trace!(
                    width = image.width(),
                    height = image.height(),
                    iterations,
                    "filtering image"
                );
                for pass in 1..=iterations {
                    image.average_pass();
                    progress.emit(u64::from(pass))?;
                }
                Ok(())
            }
        }
    }

    fn transfer(&mut self, image: ImageObject) -> ImageContents {
        let (width, height, buffer) = image.into_parts();
        ImageContents { width, height, buffer }
    }
}
