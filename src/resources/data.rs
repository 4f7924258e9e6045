use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard};
use ash::vk;
use smallvec::SmallVec;
use crate::resources::format::get_format_traits;

/// How often a piece of data changes. Drives which transfer phase it is routed to and
/// whether it is retained after its first upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum DataVariance {
    /// Uploaded once, then forgotten by the scheduler
    #[default]
    StaticData,
    /// Re-checked every frame, transferred before record traversal
    DynamicData,
    /// Re-checked every frame, transferred after record traversal
    DynamicDataTransferAfterRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataProperties {
    pub format: vk::Format,
    /// Bytes per element
    pub stride: u32,
    /// Mip levels stored in the data itself, 1 when only the base level is present
    pub mip_levels: u32,
    pub variance: DataVariance,
}

impl Default for DataProperties {
    fn default() -> Self {
        Self {
            format: vk::Format::UNDEFINED,
            stride: 1,
            mip_levels: 1,
            variance: DataVariance::StaticData,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

/// Application-owned bytes that may be uploaded to one or more devices.
///
/// The shape of the data is fixed at construction. Contents change through
/// [`Data::modify`], which bumps the modification count that transfers compare
/// against.
pub struct Data {
    properties: DataProperties,
    dimensions: Dimensions,
    bytes: RwLock<Box<[u8]>>,
    modified_count: AtomicU64,
}

impl Data {
    /// Untyped buffer data, one byte per element
    pub fn new(bytes: impl Into<Box<[u8]>>, variance: DataVariance) -> Self {
        let bytes = bytes.into();
        let width = bytes.len() as u32;
        Self {
            properties: DataProperties {
                variance,
                ..Default::default()
            },
            dimensions: Dimensions {
                width,
                height: 1,
                depth: 1,
            },
            bytes: RwLock::new(bytes),
            modified_count: AtomicU64::new(0),
        }
    }

    /// Buffer data holding a slice of plain values, e.g. vertices or a uniform block
    pub fn from_values<T: bytemuck::Pod>(values: &[T], variance: DataVariance) -> Self {
        let bytes: Box<[u8]> = bytemuck::cast_slice::<T, u8>(values).into();
        Self {
            properties: DataProperties {
                stride: size_of::<T>() as u32,
                variance,
                ..Default::default()
            },
            dimensions: Dimensions {
                width: values.len() as u32,
                height: 1,
                depth: 1,
            },
            bytes: RwLock::new(bytes),
            modified_count: AtomicU64::new(0),
        }
    }

    /// Image data. `bytes` holds every level of the mip chain described by
    /// `properties.mip_levels`, base level first.
    pub fn image(
        bytes: impl Into<Box<[u8]>>,
        dimensions: Dimensions,
        properties: DataProperties,
    ) -> Self {
        Self {
            properties,
            dimensions,
            bytes: RwLock::new(bytes.into()),
            modified_count: AtomicU64::new(0),
        }
    }

    pub fn properties(&self) -> &DataProperties {
        &self.properties
    }

    pub fn width(&self) -> u32 {
        self.dimensions.width
    }

    pub fn height(&self) -> u32 {
        self.dimensions.height
    }

    pub fn depth(&self) -> u32 {
        self.dimensions.depth
    }

    pub fn dynamic(&self) -> bool {
        self.properties.variance != DataVariance::StaticData
    }

    pub fn data_size(&self) -> usize {
        self.read().len()
    }

    /// Bytes per element: the size of `format` when it is a known one, `stride`
    /// otherwise.
    pub fn element_size(&self) -> usize {
        let traits = get_format_traits(self.properties.format);
        if traits.is_known() {
            traits.size as usize
        } else {
            self.properties.stride.max(1) as usize
        }
    }

    /// Number of elements across the whole mip chain
    pub fn value_count(&self) -> usize {
        self.data_size() / self.element_size()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.bytes.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutates the contents in place and marks the data as modified.
    pub fn modify<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut bytes = self.bytes.write().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut bytes[..]);
        self.modified_count.fetch_add(1, Ordering::AcqRel);
        result
    }

    /// Marks the data as modified without touching it
    pub fn dirty(&self) {
        self.modified_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn modified_count(&self) -> u64 {
        self.modified_count.load(Ordering::Acquire)
    }

    /// Element offset of every level in the data's own mip chain, plus the end of the
    /// chain as the final entry.
    pub fn compute_mipmap_offsets(&self) -> SmallVec<[usize; 16]> {
        let mut offsets = SmallVec::new();
        let mut offset = 0usize;
        offsets.push(offset);
        for level in 0..self.properties.mip_levels.max(1) {
            let width = (self.width() >> level).max(1) as usize;
            let height = (self.height() >> level).max(1) as usize;
            let depth = (self.depth() >> level).max(1) as usize;
            offset += width * height * depth;
            offsets.push(offset);
        }
        offsets
    }
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("properties", &self.properties)
            .field("dimensions", &self.dimensions)
            .field("modified_count", &self.modified_count())
            .finish()
    }
}

/// Last modification count synchronized to each device.
#[derive(Debug, Default)]
pub struct ModifiedCounts {
    synced: Mutex<SmallVec<[Option<u64>; 4]>>,
}

impl ModifiedCounts {
    /// Returns true if `current` differs from what `device_id` last saw, recording
    /// `current` as seen. A device that has never synced always needs the data.
    pub fn sync(&self, device_id: u32, current: u64) -> bool {
        let mut synced = self.synced.lock().unwrap_or_else(PoisonError::into_inner);
        let index = device_id as usize;
        if synced.len() <= index {
            synced.resize(index + 1, None);
        }

        if synced[index] == Some(current) {
            false
        } else {
            synced[index] = Some(current);
            true
        }
    }

    /// Makes the next `sync` for `device_id` report a change again
    pub fn forget(&self, device_id: u32) {
        let mut synced = self.synced.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = synced.get_mut(device_id as usize) {
            *count = None;
        }
    }
}
