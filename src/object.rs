use std::sync::Arc;

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::camera::Frustum;
use crate::geometry::{BoundingSphere, GeometryBuffer};
use crate::gpu::RenderDevice;
use crate::shader_structs::ObjectConstants;

/// Surface parameters bound alongside each draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub base_color: Vec3,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: Vec3::ONE,
        }
    }
}

impl Material {
    pub fn new(base_color: Vec3) -> Self {
        Self { base_color }
    }

    /// Uploads the material together with the object's world transform.
    pub fn bind(&self, device: &mut dyn RenderDevice, transform: &Mat4) {
        device.bind_object(&ObjectConstants::new(*transform, self.base_color));
    }
}

/// Placed instance of a shared mesh.
#[derive(Debug, Clone)]
pub struct RenderableObject {
    geometry: Arc<GeometryBuffer>,
    material: Arc<Material>,
    transform: Mat4,
}

impl RenderableObject {
    pub fn new(geometry: Arc<GeometryBuffer>, material: Arc<Material>) -> Self {
        Self {
            geometry,
            material,
            transform: Mat4::IDENTITY,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }

    pub fn transform(&self) -> &Mat4 {
        &self.transform
    }

    pub fn geometry(&self) -> &Arc<GeometryBuffer> {
        &self.geometry
    }

    pub fn material(&self) -> &Arc<Material> {
        &self.material
    }

    /// Bounding sphere of the mesh in world space.
    pub fn world_bounds(&self) -> BoundingSphere {
        self.geometry.bounds().transformed(&self.transform)
    }

    pub fn is_visible(&self, frustum: &Frustum) -> bool {
        frustum.intersects_sphere(&self.world_bounds())
    }

    /// Draws the object unless the frustum rejects it.
    ///
    /// A culled object touches no device state. Returns whether a draw was issued.
    pub fn render(&self, device: &mut dyn RenderDevice, frustum: &Frustum) -> bool {
        if !self.is_visible(frustum) {
            return false;
        }
        self.material.bind(device, &self.transform);
        self.geometry.draw(device);
        true
    }
}

/// Translation, then XYZ Euler rotation in degrees, then scale.
pub fn model_matrix(position: Vec3, rotation_degrees: Vec3, scale: Vec3) -> Mat4 {
    let translation = Mat4::from_translation(position);
    let rotation = Mat4::from_rotation_z(rotation_degrees.z.to_radians())
        * Mat4::from_rotation_y(rotation_degrees.y.to_radians())
        * Mat4::from_rotation_x(rotation_degrees.x.to_radians());
    translation * rotation * Mat4::from_scale(scale)
}
