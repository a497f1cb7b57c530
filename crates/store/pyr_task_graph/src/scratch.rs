/// Reusable per-worker scratch buffers.
///
/// Kernels that need temporary storage per batch (partitioning rays into
/// per-destination buckets, staging serialized bytes) take a buffer here and
/// recycle it when done, so steady-state rendering stops allocating.
#[derive(Default)]
pub struct Scratch {
    buffers: Vec<Vec<u8>>,
}

impl Scratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty byte buffer, reusing a previously recycled allocation if any.
    pub fn take_buffer(&mut self) -> Vec<u8> {
        self.buffers.pop().unwrap_or_default()
    }

    /// Give a buffer back; its capacity is kept, its contents cleared.
    pub fn recycle(&mut self, mut buffer: Vec<u8>) {
        buffer.clear();
        self.buffers.push(buffer);
    }
}
