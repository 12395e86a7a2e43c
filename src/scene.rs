use glam::{Mat4, Vec3};
use log::trace;

use crate::camera::Camera;
use crate::gpu::{BufferUsage, RenderDevice, TypedBuffer, FRAME_DATA_SLOT, LIGHT_STORAGE_SLOT};
use crate::light::PointLight;
use crate::object::RenderableObject;
use crate::shader_structs::{FrameData, GpuPointLight};

/// Counters describing one [`Scene::render`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub drawn: usize,
    pub culled: usize,
    /// Records written to the light array; zero when the upload was skipped.
    pub light_records: usize,
}

/// Objects, lights, camera and sun for one renderable world.
///
/// Object order is draw order. Light order is the index each light gets in
/// the uploaded storage array.
#[derive(Debug, Clone)]
pub struct Scene {
    objects: Vec<RenderableObject>,
    point_lights: Vec<PointLight>,
    camera: Camera,
    sun_direction: Vec3,
    sun_color: Vec3,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            objects: Vec::new(),
            point_lights: Vec::new(),
            camera: Camera::default(),
            sun_direction: Vec3::new(0.2, 1.0, 0.1),
            sun_color: Vec3::ONE,
        }
    }
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_object(&mut self, object: RenderableObject) {
        self.objects.push(object);
    }

    pub fn add_light(&mut self, light: PointLight) {
        self.point_lights.push(light);
    }

    /// Drops every object and light. Camera and sun are kept.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.point_lights.clear();
    }

    pub fn objects(&self) -> &[RenderableObject] {
        &self.objects
    }

    pub fn point_lights(&self) -> &[PointLight] {
        &self.point_lights
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    /// Stores the sun exactly as given; normalisation happens at upload time.
    pub fn set_sun(&mut self, direction: Vec3, color: Vec3) {
        self.sun_direction = direction;
        self.sun_color = color;
    }

    pub fn sun_direction(&self) -> Vec3 {
        self.sun_direction
    }

    pub fn sun_color(&self) -> Vec3 {
        self.sun_color
    }

    pub fn view_proj_matrix(&self) -> &Mat4 {
        self.camera.view_proj_matrix()
    }

    /// Uploads the frame state and draws every object that survives culling.
    ///
    /// A depth-only prepass (`z_prepass`) skips the light upload entirely.
    /// Both per-frame buffers are released before returning.
    pub fn render(&self, device: &mut dyn RenderDevice, z_prepass: bool) -> FrameStats {
        let frame_buffer =
            TypedBuffer::<FrameData>::new(device, "frame-data", BufferUsage::Uniform, 1);
        {
            let mut mapping = frame_buffer.map(device);
            mapping[0] = FrameData::new(
                *self.camera.view_proj_matrix(),
                self.point_lights.len() as u32,
                self.sun_color,
                self.upload_sun_direction(),
            );
        }
        frame_buffer.bind(device, BufferUsage::Uniform, FRAME_DATA_SLOT);

        let light_buffer = if z_prepass {
            None
        } else {
            Some(self.upload_lights(device))
        };

        let mut stats = FrameStats {
            light_records: light_buffer.as_ref().map_or(0, TypedBuffer::element_count),
            ..FrameStats::default()
        };

        let frustum = self.camera.build_frustum();
        for object in &self.objects {
            if object.render(device, &frustum) {
                stats.drawn += 1;
            } else {
                stats.culled += 1;
            }
        }

        frame_buffer.release(device);
        if let Some(light_buffer) = light_buffer {
            light_buffer.release(device);
        }

        trace!(
            "scene frame (z_prepass={z_prepass}): {} drawn, {} culled, {} light records",
            stats.drawn,
            stats.culled,
            stats.light_records
        );
        stats
    }

    fn upload_lights(&self, device: &mut dyn RenderDevice) -> TypedBuffer<GpuPointLight> {
        // One record minimum so the binding is never zero-sized.
        let light_buffer = TypedBuffer::<GpuPointLight>::new(
            device,
            "point-lights",
            BufferUsage::Storage,
            self.point_lights.len().max(1),
        );
        {
            let mut mapping = light_buffer.map(device);
            for (record, light) in mapping.iter_mut().zip(&self.point_lights) {
                *record = GpuPointLight::from(light);
            }
        }
        light_buffer.bind(device, BufferUsage::Storage, LIGHT_STORAGE_SLOT);
        light_buffer
    }

    fn upload_sun_direction(&self) -> Vec3 {
        // A zero vector has no direction; fall back to straight up.
        self.sun_direction.try_normalize().unwrap_or(Vec3::Y)
    }
}
