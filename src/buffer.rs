//! Single capture buffer.
//!
//! One allocation per configured session, sized to the negotiated frame size.
//! Released when dropped.

use crate::error::AllocError;

pub struct CaptureBuffer {
    data: Vec<u8>,
}

impl CaptureBuffer {
    /// Allocate `size` zeroed bytes. Fails instead of aborting when the
    /// allocator cannot satisfy the request.
    pub fn allocate(size: usize) -> Result<Self, AllocError> {
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| AllocError { size })?;
        data.resize(size, 0);
        log::debug!("capture buffer allocated ({} bytes)", size);
        Ok(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for CaptureBuffer {
    fn drop(&mut self) {
        log::debug!("capture buffer released ({} bytes)", self.data.len());
    }
}
