//! Opaque GPU resource layer shared by the scene and the device backends.
//!
//! The scene never talks to a graphics API directly. It allocates typed
//! buffers through a [`RenderDevice`], fills them through a scoped
//! [`BufferMapping`] and binds them to numbered slots. Backends decide what a
//! slot means: the wgpu renderer turns them into bind groups, the recording
//! device keeps a command log.

use std::marker::PhantomData;
use std::mem::size_of;
use std::ops::{Deref, DerefMut};

use bytemuck::Pod;

use crate::shader_structs::ObjectConstants;

/// Uniform binding point of the per-frame [`FrameData`](crate::shader_structs::FrameData) block.
pub const FRAME_DATA_SLOT: u32 = 0;
/// Storage binding point of the point light array.
pub const LIGHT_STORAGE_SLOT: u32 = 1;
/// Vertex buffer slot used by [`GeometryBuffer`](crate::geometry::GeometryBuffer).
pub const VERTEX_BUFFER_SLOT: u32 = 0;

/// How a buffer is consumed once bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Attribute,
    Index,
    Uniform,
    Storage,
}

/// Index of a buffer inside a device's resource arena.
///
/// Handles are only meaningful for the device that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(u32);

impl BufferHandle {
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Minimal command surface the renderer core needs from a graphics backend.
///
/// Submission is fire-and-forget: no method reports GPU failures. Backends
/// log what they cannot honour and carry on.
pub trait RenderDevice {
    /// Allocates `size` bytes of zero-initialised buffer storage.
    fn create_buffer(&mut self, label: &str, usage: BufferUsage, size: u64) -> BufferHandle;

    /// Copies `data` into the buffer starting at `offset` bytes.
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    /// Releases the buffer. The handle may be reused by later allocations.
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Makes `buffer` the active source for `usage` at binding point `slot`.
    fn bind_buffer(&mut self, buffer: BufferHandle, usage: BufferUsage, slot: u32);

    /// Sets the per-draw material and transform block.
    fn bind_object(&mut self, constants: &ObjectConstants);

    /// Issues one indexed triangle-list draw over the bound vertex and index buffers.
    fn draw_indexed(&mut self, index_count: u32);
}

/// Device buffer holding `len` records of `T`.
#[derive(Debug)]
pub struct TypedBuffer<T: Pod> {
    handle: BufferHandle,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> TypedBuffer<T> {
    /// Allocates room for `len` zeroed records.
    pub fn new(device: &mut dyn RenderDevice, label: &str, usage: BufferUsage, len: usize) -> Self {
        let size = (len * size_of::<T>()) as u64;
        let handle = device.create_buffer(label, usage, size);
        Self {
            handle,
            len,
            _marker: PhantomData,
        }
    }

    /// Allocates a buffer sized for `data` and uploads it.
    pub fn from_slice(
        device: &mut dyn RenderDevice,
        label: &str,
        usage: BufferUsage,
        data: &[T],
    ) -> Self {
        let buffer = Self::new(device, label, usage, data.len());
        if !data.is_empty() {
            device.write_buffer(buffer.handle, 0, bytemuck::cast_slice(data));
        }
        buffer
    }

    /// Opens a write-only mapping over every record.
    ///
    /// The mapping starts zeroed; its contents reach the device when it is
    /// dropped, so writes are visible to any bind issued afterwards.
    pub fn map<'a>(&self, device: &'a mut dyn RenderDevice) -> BufferMapping<'a, T> {
        BufferMapping {
            device,
            handle: self.handle,
            staging: vec![<T as bytemuck::Zeroable>::zeroed(); self.len],
        }
    }

    pub fn bind(&self, device: &mut dyn RenderDevice, usage: BufferUsage, slot: u32) {
        device.bind_buffer(self.handle, usage, slot);
    }

    pub fn element_count(&self) -> usize {
        self.len
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    /// Hands the storage back to the device.
    pub fn release(self, device: &mut dyn RenderDevice) {
        device.destroy_buffer(self.handle);
    }
}

/// Scoped write access to a [`TypedBuffer`].
pub struct BufferMapping<'a, T: Pod> {
    device: &'a mut dyn RenderDevice,
    handle: BufferHandle,
    staging: Vec<T>,
}

impl<T: Pod> Deref for BufferMapping<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.staging
    }
}

impl<T: Pod> DerefMut for BufferMapping<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.staging
    }
}

impl<T: Pod> Drop for BufferMapping<'_, T> {
    fn drop(&mut self) {
        if !self.staging.is_empty() {
            self.device
                .write_buffer(self.handle, 0, bytemuck::cast_slice(&self.staging));
        }
    }
}
