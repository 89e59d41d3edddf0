use std::os::fd::AsFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use wayland_client::protocol::{wl_buffer, wl_shm, wl_shm_pool};
use wayland_client::{Dispatch, QueueHandle};

/// Released flag shared with the `wl_buffer` dispatcher
pub type BufferRelease = Arc<AtomicBool>;

/// Shared memory buffer a screen surface is copied into before it is
/// attached to the compositor surface
pub struct ShmBuffer {
    pool: wl_shm_pool::WlShmPool,
    buffer: wl_buffer::WlBuffer,
    mmap: memmap2::MmapMut,
    released: BufferRelease,
    width: u32,
    height: u32,
}

impl ShmBuffer {
    pub fn new<D>(
        shm: &wl_shm::WlShm,
        width: u32,
        height: u32,
        qh: &QueueHandle<D>,
    ) -> anyhow::Result<Self>
    where
        D: Dispatch<wl_shm_pool::WlShmPool, ()> + Dispatch<wl_buffer::WlBuffer, BufferRelease> + 'static,
    {
        let stride = width * 4; // 4 bytes per pixel (ARGB8888)
        let size = stride * height;

        let file = tempfile::tempfile()?;
        file.set_len(size as u64)?;

        let mmap = unsafe { memmap2::MmapMut::map_mut(&file)? };

        let pool = shm.create_pool(file.as_fd(), size as i32, qh, ());

        let released = Arc::new(AtomicBool::new(true));
        let buffer = pool.create_buffer(
            0,
            width as i32,
            height as i32,
            stride as i32,
            wl_shm::Format::Argb8888,
            qh,
            Arc::clone(&released),
        );

        Ok(Self {
            pool,
            buffer,
            mmap,
            released,
            width,
            height,
        })
    }

    /// Copy a whole frame in. Data must be ARGB8888 (BGRA byte order).
    pub fn write(&mut self, data: &[u8]) -> anyhow::Result<()> {
        if data.len() != self.mmap.len() {
            anyhow::bail!(
                "Frame size mismatch: expected {}, got {}",
                self.mmap.len(),
                data.len()
            );
        }

        self.mmap.copy_from_slice(data);
        Ok(())
    }

    pub fn buffer(&self) -> &wl_buffer::WlBuffer {
        &self.buffer
    }

    /// The compositor is done reading it
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Call right before attaching
    pub fn mark_busy(&self) {
        self.released.store(false, Ordering::Release);
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl Drop for ShmBuffer {
    fn drop(&mut self) {
        self.buffer.destroy();
        self.pool.destroy();
    }
}
