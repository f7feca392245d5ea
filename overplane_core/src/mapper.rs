// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Device-visible mappings of graphics buffers.
//!
//! A [`BufferMapper`] turns a buffer into something a display plane can scan
//! out: up to [`SUB_BUFFER_MAX`] sub-buffers, each with a CPU address and a
//! device (GTT) offset, plus a lazily created kernel handle and framebuffer
//! object. A mapper is either fully mapped or fully unmapped.
//!
//! [`GrallocBufferMapper`] carries the state common to every platform and
//! delegates the hardware calls to a [`MappingDevice`].

use alloc::rc::Rc;
use core::cell::RefCell;
use core::fmt;

use crate::buffer::{BufferHandle, BufferInfo};

/// Maximum number of sub-buffers (planes) in one buffer.
pub const SUB_BUFFER_MAX: usize = 3;

/// A mapper shared between the buffer pool and the planes scanning it out.
pub type SharedMapper = Rc<RefCell<dyn BufferMapper>>;

/// Errors from mapping operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapError {
    /// The allocator could not describe the handle.
    Describe(BufferHandle),
    /// CPU addresses for the sub-buffers could not be obtained.
    CpuAddress,
    /// The device refused to map a sub-buffer.
    Gtt {
        /// Index of the sub-buffer that failed.
        sub: usize,
    },
    /// The kernel buffer object could not be wrapped.
    KernelBuffer,
    /// A framebuffer object could not be registered.
    Framebuffer,
    /// The sub-buffer index is not supported for this operation.
    InvalidSubBuffer(usize),
    /// The operation needs a mapped buffer.
    NotMapped,
    /// The allocator could not allocate a buffer.
    Allocation,
    /// Every slot of the mapping pool is taken.
    PoolExhausted,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Describe(handle) => write!(f, "cannot describe buffer {handle:?}"),
            Self::CpuAddress => f.write_str("failed to get CPU addresses"),
            Self::Gtt { sub } => write!(f, "failed to map sub-buffer {sub} into the GTT"),
            Self::KernelBuffer => f.write_str("failed to wrap kernel buffer"),
            Self::Framebuffer => f.write_str("failed to register framebuffer object"),
            Self::InvalidSubBuffer(sub) => write!(f, "invalid sub-buffer index {sub}"),
            Self::NotMapped => f.write_str("buffer is not mapped"),
            Self::Allocation => f.write_str("buffer allocation failed"),
            Self::PoolExhausted => f.write_str("buffer mapping pool is full"),
        }
    }
}

impl core::error::Error for MapError {}

/// A sub-buffer region in CPU address space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuRegion {
    /// CPU virtual address.
    pub address: usize,
    /// Size in bytes; zero means the sub-buffer is absent.
    pub size: u32,
}

/// One mapped sub-buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubMapping {
    /// Offset in the device aperture.
    pub device_offset: u32,
    /// CPU virtual address.
    pub cpu_address: usize,
    /// Size in bytes.
    pub size: u32,
}

/// Integer source crop in buffer pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Crop {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl Crop {
    /// Creates a crop rectangle.
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// A buffer prepared for scan-out.
pub trait BufferMapper: fmt::Debug {
    /// Metadata of the mapped buffer.
    fn info(&self) -> &BufferInfo;

    /// Maps every sub-buffer into the device. Does nothing when already
    /// mapped. On failure nothing stays mapped.
    fn map(&mut self) -> Result<(), MapError>;

    /// Releases every sub-buffer. Does nothing when not mapped.
    fn unmap(&mut self);

    /// Returns `true` between a successful `map` and the next `unmap`.
    fn is_mapped(&self) -> bool;

    /// Returns the mapping of sub-buffer `sub`, if mapped and present.
    fn sub_mapping(&self, sub: usize) -> Option<SubMapping>;

    /// Returns the kernel buffer handle, wrapping it on first use.
    fn k_handle(&mut self, sub: usize) -> Result<u32, MapError>;

    /// Returns a framebuffer object id, registering one on first use. Must
    /// be paired with [`put_fb_handle`](Self::put_fb_handle).
    fn fb_handle(&mut self, sub: usize) -> Result<u32, MapError>;

    /// Releases the framebuffer object, if any.
    fn put_fb_handle(&mut self);

    /// Source crop applied when scanning out.
    fn crop(&self) -> Crop;

    /// Sets the source crop.
    fn set_crop(&mut self, crop: Crop);

    /// Returns `true` if the content is render-compressed.
    fn is_compressed(&self) -> bool;

    /// Marks the content as render-compressed.
    fn set_compressed(&mut self, compressed: bool);
}

/// Platform hooks used by [`GrallocBufferMapper`].
pub trait MappingDevice {
    /// Returns the CPU region of every sub-buffer of `info`. Absent
    /// sub-buffers have zero size.
    fn cpu_regions(&self, info: &BufferInfo) -> Result<[CpuRegion; SUB_BUFFER_MAX], MapError>;

    /// Releases the CPU regions obtained by [`cpu_regions`](Self::cpu_regions).
    fn put_cpu_regions(&self, info: &BufferInfo);

    /// Maps `region` into the device aperture and returns its offset.
    fn gtt_map(&self, region: CpuRegion) -> Result<u32, MapError>;

    /// Removes `region` from the device aperture.
    fn gtt_unmap(&self, region: CpuRegion);

    /// Wraps the buffer's kernel object and returns its handle.
    fn wrap_kernel_buffer(&self, info: &BufferInfo) -> Result<u32, MapError>;

    /// Registers a framebuffer object for the kernel buffer `k_handle`.
    fn add_framebuffer(&self, info: &BufferInfo, k_handle: u32) -> Result<u32, MapError>;

    /// Unregisters a framebuffer object.
    fn remove_framebuffer(&self, fb: u32);
}

/// A [`BufferMapper`] for allocator buffers, parameterized by the platform's
/// [`MappingDevice`].
pub struct GrallocBufferMapper<D: MappingDevice> {
    device: Rc<D>,
    info: BufferInfo,
    regions: [CpuRegion; SUB_BUFFER_MAX],
    subs: [Option<SubMapping>; SUB_BUFFER_MAX],
    mapped: bool,
    k_handle: Option<u32>,
    fb: Option<u32>,
    crop: Crop,
    compressed: bool,
}

impl<D: MappingDevice> GrallocBufferMapper<D> {
    /// Creates an unmapped mapper for `info`.
    #[must_use]
    pub fn new(device: Rc<D>, info: BufferInfo) -> Self {
        Self {
            device,
            info,
            regions: [CpuRegion::default(); SUB_BUFFER_MAX],
            subs: [None; SUB_BUFFER_MAX],
            mapped: false,
            k_handle: None,
            fb: None,
            crop: Crop::new(0, 0, info.width, info.height),
            compressed: false,
        }
    }

    /// Creates the mapper and wraps it for sharing.
    #[must_use]
    pub fn shared(device: Rc<D>, info: BufferInfo) -> SharedMapper
    where
        D: 'static,
    {
        Rc::new(RefCell::new(Self::new(device, info)))
    }

    fn release_regions(&mut self) {
        for (region, sub) in self.regions.iter().zip(self.subs.iter_mut()) {
            if sub.take().is_some() {
                self.device.gtt_unmap(*region);
            }
        }
        self.device.put_cpu_regions(&self.info);
        self.regions = [CpuRegion::default(); SUB_BUFFER_MAX];
    }
}

impl<D: MappingDevice> fmt::Debug for GrallocBufferMapper<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrallocBufferMapper")
            .field("info", &self.info)
            .field("subs", &self.subs)
            .field("mapped", &self.mapped)
            .field("k_handle", &self.k_handle)
            .field("fb", &self.fb)
            .field("crop", &self.crop)
            .field("compressed", &self.compressed)
            .finish_non_exhaustive()
    }
}

impl<D: MappingDevice> BufferMapper for GrallocBufferMapper<D> {
    fn info(&self) -> &BufferInfo {
        &self.info
    }

    fn map(&mut self) -> Result<(), MapError> {
        if self.mapped {
            return Ok(());
        }

        self.regions = self.device.cpu_regions(&self.info)?;
        for sub in 0..SUB_BUFFER_MAX {
            let region = self.regions[sub];
            if region.size == 0 {
                continue;
            }
            match self.device.gtt_map(region) {
                Ok(device_offset) => {
                    self.subs[sub] = Some(SubMapping {
                        device_offset,
                        cpu_address: region.address,
                        size: region.size,
                    });
                }
                Err(err) => {
                    log::error!("failed to map sub-buffer {sub} of {:?}", self.info.handle);
                    self.release_regions();
                    return Err(err);
                }
            }
        }

        self.mapped = true;
        Ok(())
    }

    fn unmap(&mut self) {
        if !self.mapped {
            return;
        }
        self.release_regions();
        self.mapped = false;
    }

    fn is_mapped(&self) -> bool {
        self.mapped
    }

    fn sub_mapping(&self, sub: usize) -> Option<SubMapping> {
        self.subs.get(sub).copied().flatten()
    }

    fn k_handle(&mut self, sub: usize) -> Result<u32, MapError> {
        if sub != 0 {
            return Err(MapError::InvalidSubBuffer(sub));
        }
        if let Some(handle) = self.k_handle {
            return Ok(handle);
        }
        let handle = self.device.wrap_kernel_buffer(&self.info)?;
        self.k_handle = Some(handle);
        Ok(handle)
    }

    fn fb_handle(&mut self, sub: usize) -> Result<u32, MapError> {
        if sub != 0 {
            return Err(MapError::InvalidSubBuffer(sub));
        }
        if let Some(fb) = self.fb {
            return Ok(fb);
        }
        let k_handle = self.k_handle(0)?;
        let fb = self.device.add_framebuffer(&self.info, k_handle)?;
        self.fb = Some(fb);
        Ok(fb)
    }

    fn put_fb_handle(&mut self) {
        if let Some(fb) = self.fb.take() {
            self.device.remove_framebuffer(fb);
        }
    }

    fn crop(&self) -> Crop {
        self.crop
    }

    fn set_crop(&mut self, crop: Crop) {
        self.crop = crop;
    }

    fn is_compressed(&self) -> bool {
        self.compressed
    }

    fn set_compressed(&mut self, compressed: bool) {
        self.compressed = compressed;
    }
}

impl<D: MappingDevice> Drop for GrallocBufferMapper<D> {
    fn drop(&mut self) {
        if self.fb.is_some() {
            log::warn!(
                "framebuffer of {:?} was never put back; releasing",
                self.info.handle
            );
            self.put_fb_handle();
        }
        if self.mapped {
            log::warn!("{:?} dropped while mapped", self.info.handle);
            self.unmap();
        }
    }
}
