use memmap2::{Mmap, MmapAsRawDesc, MmapMut};
use std::ops::{Deref, DerefMut};

use super::{DexFile, DexLocation};
use crate::Result;

// ----------------------------------------------------------------------------
// DexContainer
// ----------------------------------------------------------------------------
pub trait DexContainer<'a>: AsRef<[u8]> + Deref<Target = [u8]> + 'a {
    fn data(&'a self) -> &'a [u8] {
        self.as_ref()
    }

    fn file_size(&'a self) -> usize {
        self.data().len()
    }
}

// ----------------------------------------------------------------------------
// DexContainerMut
// ----------------------------------------------------------------------------
pub trait DexContainerMut<'a>: DexContainer<'a> + DerefMut {
    fn data_mut(&'a mut self) -> &'a mut [u8] {
        self.deref_mut()
    }
}

// ----------------------------------------------------------------------------
// default implementations
// ----------------------------------------------------------------------------
impl DexContainer<'_> for Mmap {}
impl DexContainer<'_> for MmapMut {}
impl DexContainerMut<'_> for MmapMut {}

impl<'a> DexContainer<'a> for &'a [u8] {}

impl DexContainer<'_> for Vec<u8> {}
impl DexContainerMut<'_> for Vec<u8> {}

// ----------------------------------------------------------------------------
// InMemoryDexContainer
// ----------------------------------------------------------------------------
pub struct InMemoryDexContainer<'a>(&'a [u8]);

impl<'a> InMemoryDexContainer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self(data)
    }
}

impl<'a> Deref for InMemoryDexContainer<'a> {
    type Target = [u8];
    fn deref(&self) -> &'a Self::Target {
        self.0
    }
}

impl<'a> AsRef<[u8]> for InMemoryDexContainer<'a> {
    fn as_ref(&self) -> &'a [u8] {
        self.0
    }
}

impl<'a> DexContainer<'a> for InMemoryDexContainer<'a> {}

// ----------------------------------------------------------------------------
// DexFileContainer
// ----------------------------------------------------------------------------
pub struct DexFileContainer {
    mmap: Mmap,
    location: String,
    pub verify: bool,
    pub verify_checksum: bool,
}

impl DexFileContainer {
    pub fn new<T>(file: T) -> Result<Self>
    where
        T: MmapAsRawDesc,
    {
        let mmap = unsafe {
            Mmap::map(file).map_err(|e| {
                crate::error::DexError::DexFileError(format!("mmap failed: {e}"))
            })?
        };
        Ok(Self {
            mmap,
            verify: false,
            verify_checksum: false,
            location: "[anonymous]".to_string(),
        })
    }

    pub fn location(mut self, location: String) -> Self {
        self.location = location;
        self
    }

    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn verify_checksum(mut self, verify_checksum: bool) -> Self {
        self.verify_checksum = verify_checksum;
        self
    }

    pub fn open(&self) -> Result<DexFile<'_, Mmap>> {
        let dex = DexFile::from_raw_parts(
            &self.mmap,
            DexLocation::Path(self.location.clone()),
        )?;
        dex.check_header()?;
        if self.verify {
            dex.verify(self.verify_checksum)?;
        }
        Ok(dex)
    }

    pub fn get_location(&self) -> &str {
        &self.location
    }

    pub fn data(&self) -> &Mmap {
        &self.mmap
    }
}
