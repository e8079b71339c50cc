// SPDX-License-Identifier: GPL-3.0-only

//! Status placeholder images
//!
//! The three PNGs are compiled into the binary, decoded once at start-up and
//! kept on the device as RGB24 so publishing one costs nothing per tick.
//! Images with an alpha channel go through the channel-swap kernel to drop
//! it, the rest are uploaded as they are.

use crate::backends::capture::PlaceholderKind;
use crate::constants::{OUTPUT_BYTES_PER_PIXEL, assets};
use crate::gpu::{ConvertJob, ConvertKernel, DevicePtr, GpuBackend, GpuError};
use image::{DynamicImage, ImageFormat};
use rust_embed::RustEmbed;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

#[derive(RustEmbed)]
#[folder = "assets/placeholders/"]
struct PlaceholderAssets;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderError {
    /// Asset not embedded in the binary
    Missing(&'static str),
    Decode { name: &'static str, reason: String },
    Gpu(GpuError),
}

impl fmt::Display for PlaceholderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaceholderError::Missing(name) => write!(f, "placeholder {} is not embedded", name),
            PlaceholderError::Decode { name, reason } => {
                write!(f, "failed to decode placeholder {}: {}", name, reason)
            }
            PlaceholderError::Gpu(e) => write!(f, "placeholder upload failed: {}", e),
        }
    }
}

impl std::error::Error for PlaceholderError {}

impl From<GpuError> for PlaceholderError {
    fn from(e: GpuError) -> Self {
        PlaceholderError::Gpu(e)
    }
}

/// RGB24 placeholder resident in device memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceholderImage {
    pub ptr: DevicePtr,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub size: usize,
}

fn asset_name(kind: PlaceholderKind) -> &'static str {
    match kind {
        PlaceholderKind::NoSdk => assets::NO_SDK,
        PlaceholderKind::NoDevice => assets::NO_DEVICE,
        PlaceholderKind::NoSignal => assets::NO_SIGNAL,
    }
}

/// Decode an embedded placeholder
pub fn decode(kind: PlaceholderKind) -> Result<DynamicImage, PlaceholderError> {
    let name = asset_name(kind);
    let file = PlaceholderAssets::get(name).ok_or(PlaceholderError::Missing(name))?;
    image::load_from_memory_with_format(&file.data, ImageFormat::Png).map_err(|e| {
        PlaceholderError::Decode {
            name,
            reason: e.to_string(),
        }
    })
}

/// The loaded placeholder images
#[derive(Debug, Default)]
pub struct PlaceholderSet {
    images: HashMap<PlaceholderKind, PlaceholderImage>,
}

impl PlaceholderSet {
    /// Decode every placeholder and upload it as RGB24
    ///
    /// Anything already uploaded is freed again if a later image fails.
    pub fn load(backend: &dyn GpuBackend) -> Result<Self, PlaceholderError> {
        let mut set = Self::default();
        for kind in [
            PlaceholderKind::NoSdk,
            PlaceholderKind::NoDevice,
            PlaceholderKind::NoSignal,
        ] {
            match upload(backend, kind) {
                Ok(placeholder) => {
                    set.images.insert(kind, placeholder);
                }
                Err(e) => {
                    let _ = set.release(backend);
                    return Err(e);
                }
            }
        }
        info!(count = set.images.len(), "Placeholders loaded");
        Ok(set)
    }

    pub fn get(&self, kind: PlaceholderKind) -> Option<&PlaceholderImage> {
        self.images.get(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Free every image; the first error is returned after all were tried
    pub fn release(&mut self, backend: &dyn GpuBackend) -> Result<(), GpuError> {
        let mut result = Ok(());
        for (_, placeholder) in self.images.drain() {
            if let Err(e) = backend.free(placeholder.ptr)
                && result.is_ok()
            {
                result = Err(e);
            }
        }
        result
    }
}

fn upload(
    backend: &dyn GpuBackend,
    kind: PlaceholderKind,
) -> Result<PlaceholderImage, PlaceholderError> {
    let image = decode(kind)?;
    let (width, height) = (image.width(), image.height());
    let stride = width as usize * OUTPUT_BYTES_PER_PIXEL;
    let size = stride * height as usize;
    let dst = backend.alloc(size)?;

    let uploaded = if image.color().has_alpha() {
        upload_rgba(backend, &image, dst, stride)
    } else {
        backend.copy_htod(dst.into(), image.to_rgb8().as_raw())
    };
    if let Err(e) = uploaded {
        let _ = backend.free(dst);
        return Err(e.into());
    }

    debug!(
        ?kind,
        width,
        height,
        alpha = image.color().has_alpha(),
        "Placeholder uploaded"
    );
    Ok(PlaceholderImage {
        ptr: dst,
        width,
        height,
        stride,
        size,
    })
}

fn upload_rgba(
    backend: &dyn GpuBackend,
    image: &DynamicImage,
    dst: DevicePtr,
    stride: usize,
) -> Result<(), GpuError> {
    let rgba = image.to_rgba8();
    let staging = backend.alloc(rgba.as_raw().len())?;
    let converted = backend
        .copy_htod(staging.into(), rgba.as_raw())
        .and_then(|_| {
            backend.convert(&ConvertJob {
                kernel: ConvertKernel::RGBA_TO_RGB,
                src: staging.into(),
                src_chroma: None,
                src_step: image.width() as usize * 4,
                dst,
                dst_step: stride,
                width: image.width(),
                height: image.height(),
            })
        });
    let freed = backend.free(staging);
    converted.and(freed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{DeviceSlice, HostBackend};

    #[test]
    fn test_every_placeholder_decodes() {
        for kind in [
            PlaceholderKind::NoSdk,
            PlaceholderKind::NoDevice,
            PlaceholderKind::NoSignal,
        ] {
            let image = decode(kind).unwrap();
            assert!(image.width() > 0 && image.height() > 0);
        }
    }

    #[test]
    fn test_alpha_is_dropped() {
        let backend = HostBackend::new();
        backend.open_context().unwrap();
        let set = PlaceholderSet::load(&backend).unwrap();

        let image = decode(PlaceholderKind::NoDevice).unwrap();
        assert!(image.color().has_alpha());
        let placeholder = set.get(PlaceholderKind::NoDevice).unwrap();
        assert_eq!(placeholder.stride, image.width() as usize * 3);

        let mut rgb = vec![0u8; placeholder.size];
        backend
            .copy_dtoh(DeviceSlice::from(placeholder.ptr), &mut rgb)
            .unwrap();
        assert_eq!(rgb, image.to_rgb8().into_raw());
    }

    #[test]
    fn test_release_frees_everything() {
        let backend = HostBackend::new();
        backend.open_context().unwrap();
        let mut set = PlaceholderSet::load(&backend).unwrap();
        assert_eq!(backend.live_allocations(), 3);
        set.release(&backend).unwrap();
        assert!(set.is_empty());
        assert_eq!(backend.live_allocations(), 0);
    }
}
