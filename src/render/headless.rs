use log::warn;

use crate::gpu::{BufferHandle, BufferUsage, RenderDevice, FRAME_DATA_SLOT, LIGHT_STORAGE_SLOT};
use crate::shader_structs::{FrameData, GpuPointLight, ObjectConstants};

/// One recorded device call.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BindBuffer {
        buffer: BufferHandle,
        usage: BufferUsage,
        slot: u32,
        /// Snapshot of uniform and storage contents at bind time.
        contents: Option<Vec<u8>>,
    },
    BindObject(ObjectConstants),
    DrawIndexed {
        index_count: u32,
    },
}

#[derive(Debug)]
struct RecordedBuffer {
    label: String,
    usage: BufferUsage,
    data: Vec<u8>,
}

/// CPU-only device that keeps buffers in memory and logs every command.
///
/// Used for tests and for running scenes without a window.
#[derive(Debug, Default)]
pub struct RecordingDevice {
    buffers: Vec<Option<RecordedBuffer>>,
    free_slots: Vec<usize>,
    commands: Vec<Command>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn draw_calls(&self) -> usize {
        self.commands
            .iter()
            .filter(|command| matches!(command, Command::DrawIndexed { .. }))
            .count()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.iter().flatten().count()
    }

    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffer(buffer).map(|recorded| recorded.data.as_slice())
    }

    pub fn buffer_label(&self, buffer: BufferHandle) -> Option<&str> {
        self.buffer(buffer).map(|recorded| recorded.label.as_str())
    }

    /// Most recent frame block bound at the frame-data slot.
    pub fn last_frame_data(&self) -> Option<FrameData> {
        self.last_snapshot(BufferUsage::Uniform, FRAME_DATA_SLOT)
            .filter(|bytes| bytes.len() >= std::mem::size_of::<FrameData>())
            .map(|bytes| bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<FrameData>()]))
    }

    /// Most recent light array bound at the storage slot.
    pub fn last_point_lights(&self) -> Option<Vec<GpuPointLight>> {
        self.last_snapshot(BufferUsage::Storage, LIGHT_STORAGE_SLOT)
            .map(|bytes| {
                bytes
                    .chunks_exact(std::mem::size_of::<GpuPointLight>())
                    .map(bytemuck::pod_read_unaligned)
                    .collect()
            })
    }

    fn last_snapshot(&self, wanted_usage: BufferUsage, wanted_slot: u32) -> Option<&[u8]> {
        self.commands.iter().rev().find_map(|command| match command {
            Command::BindBuffer {
                usage,
                slot,
                contents: Some(contents),
                ..
            } if *usage == wanted_usage && *slot == wanted_slot => Some(contents.as_slice()),
            _ => None,
        })
    }

    fn buffer(&self, buffer: BufferHandle) -> Option<&RecordedBuffer> {
        self.buffers.get(buffer.index()).and_then(Option::as_ref)
    }
}

impl RenderDevice for RecordingDevice {
    fn create_buffer(&mut self, label: &str, usage: BufferUsage, size: u64) -> BufferHandle {
        let recorded = RecordedBuffer {
            label: label.to_string(),
            usage,
            data: vec![0; size as usize],
        };
        match self.free_slots.pop() {
            Some(index) => {
                self.buffers[index] = Some(recorded);
                BufferHandle::from_index(index)
            }
            None => {
                self.buffers.push(Some(recorded));
                BufferHandle::from_index(self.buffers.len() - 1)
            }
        }
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(recorded) = self
            .buffers
            .get_mut(buffer.index())
            .and_then(Option::as_mut)
        else {
            warn!("write to unknown buffer {buffer:?}");
            return;
        };
        let start = offset as usize;
        let Some(target) = recorded.data.get_mut(start..start + data.len()) else {
            warn!(
                "write of {} bytes at {offset} overflows buffer {}",
                data.len(),
                recorded.label
            );
            return;
        };
        target.copy_from_slice(data);
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(entry) = self.buffers.get_mut(buffer.index()) {
            if entry.take().is_some() {
                self.free_slots.push(buffer.index());
            }
        }
    }

    fn bind_buffer(&mut self, buffer: BufferHandle, usage: BufferUsage, slot: u32) {
        let contents = match usage {
            BufferUsage::Uniform | BufferUsage::Storage => {
                self.buffer_contents(buffer).map(<[u8]>::to_vec)
            }
            BufferUsage::Attribute | BufferUsage::Index => None,
        };
        if let Some(recorded) = self.buffer(buffer) {
            if recorded.usage != usage {
                warn!(
                    "buffer {} created for {:?} bound as {usage:?}",
                    recorded.label, recorded.usage
                );
            }
        }
        self.commands.push(Command::BindBuffer {
            buffer,
            usage,
            slot,
            contents,
        });
    }

    fn bind_object(&mut self, constants: &ObjectConstants) {
        self.commands.push(Command::BindObject(*constants));
    }

    fn draw_indexed(&mut self, index_count: u32) {
        self.commands.push(Command::DrawIndexed { index_count });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freed_slots_are_reused() {
        let mut device = RecordingDevice::new();
        let first = device.create_buffer("a", BufferUsage::Uniform, 16);
        let second = device.create_buffer("b", BufferUsage::Uniform, 16);
        device.destroy_buffer(first);
        let third = device.create_buffer("c", BufferUsage::Storage, 32);
        assert_eq!(third, first);
        assert_ne!(third, second);
        assert_eq!(device.buffer_label(third), Some("c"));
        assert_eq!(device.live_buffer_count(), 2);
    }

    #[test]
    fn overflowing_write_is_ignored() {
        let mut device = RecordingDevice::new();
        let buffer = device.create_buffer("small", BufferUsage::Uniform, 4);
        device.write_buffer(buffer, 2, &[1, 2, 3, 4]);
        assert_eq!(device.buffer_contents(buffer), Some(&[0u8, 0, 0, 0][..]));
    }

    #[test]
    fn bind_snapshots_survive_buffer_release() {
        let mut device = RecordingDevice::new();
        let buffer = device.create_buffer("frame", BufferUsage::Storage, 32);
        device.write_buffer(buffer, 0, bytemuck::bytes_of(&GpuPointLight {
            radius: 2.0,
            ..GpuPointLight::default()
        }));
        device.bind_buffer(buffer, BufferUsage::Storage, LIGHT_STORAGE_SLOT);
        device.destroy_buffer(buffer);

        let lights = device.last_point_lights().unwrap();
        assert_eq!(lights.len(), 1);
        assert_eq!(lights[0].radius, 2.0);
    }
}
