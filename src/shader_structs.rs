//! Records shared bit-for-bit with the WGSL shaders.
//!
//! Layouts follow the WGSL host-shareable rules: a `vec3<f32>` is aligned to
//! 16 bytes in both uniform and storage blocks, so the Rust mirrors carry
//! explicit padding fields.

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec3};

use crate::light::PointLight;

/// Uniform block bound at slot 0 once per frame.
///
/// ```wgsl
/// struct FrameData {
///     view_proj: mat4x4<f32>,      // offset 0
///     point_light_count: u32,      // offset 64
///     sun_color: vec3<f32>,        // offset 80
///     sun_dir: vec3<f32>,          // offset 96
/// }                                // size 112
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct FrameData {
    pub view_proj: [[f32; 4]; 4],
    pub point_light_count: u32,
    pub _pad0: [u32; 3],
    pub sun_color: [f32; 3],
    pub _pad1: f32,
    pub sun_dir: [f32; 3],
    pub _pad2: f32,
}

impl FrameData {
    pub fn new(view_proj: Mat4, point_light_count: u32, sun_color: Vec3, sun_dir: Vec3) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            point_light_count,
            sun_color: sun_color.into(),
            sun_dir: sun_dir.into(),
            ..Self::zeroed()
        }
    }
}

/// One element of the storage array bound at slot 1.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuPointLight {
    pub position: [f32; 3],
    pub radius: f32,
    pub color: [f32; 3],
    pub _pad: f32,
}

impl From<&PointLight> for GpuPointLight {
    fn from(light: &PointLight) -> Self {
        Self {
            position: light.position().into(),
            radius: light.radius(),
            color: light.color().into(),
            _pad: 0.0,
        }
    }
}

/// Per-draw material and transform block (group 1, binding 0).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ObjectConstants {
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 3],
    pub color: [f32; 4],
}

impl ObjectConstants {
    pub fn new(model: Mat4, color: Vec3) -> Self {
        let normal = Mat3::from_mat4(model).inverse().transpose();
        Self {
            model: model.to_cols_array_2d(),
            normal: mat3_to_3x4(normal),
            color: color.extend(1.0).into(),
        }
    }
}

fn mat3_to_3x4(matrix: Mat3) -> [[f32; 4]; 3] {
    let cols = matrix.to_cols_array();
    [
        [cols[0], cols[1], cols[2], 0.0],
        [cols[3], cols[4], cols[5], 0.0],
        [cols[6], cols[7], cols[8], 0.0],
    ]
}

#[cfg(test)]
mod tests {
    use std::mem::{offset_of, size_of};

    use super::*;

    #[test]
    fn frame_data_matches_wgsl_uniform_layout() {
        assert_eq!(offset_of!(FrameData, view_proj), 0);
        assert_eq!(offset_of!(FrameData, point_light_count), 64);
        assert_eq!(offset_of!(FrameData, sun_color), 80);
        assert_eq!(offset_of!(FrameData, sun_dir), 96);
        assert_eq!(size_of::<FrameData>(), 112);
    }

    #[test]
    fn point_light_record_is_32_bytes() {
        assert_eq!(offset_of!(GpuPointLight, radius), 12);
        assert_eq!(offset_of!(GpuPointLight, color), 16);
        assert_eq!(offset_of!(GpuPointLight, _pad), 28);
        assert_eq!(size_of::<GpuPointLight>(), 32);
    }

    #[test]
    fn gpu_light_copies_fields_and_zeroes_padding() {
        let light = PointLight::new(Vec3::new(1.0, 2.0, 3.0), 4.0, Vec3::new(10.0, 0.5, 0.0));
        let record = GpuPointLight::from(&light);
        assert_eq!(record.position, [1.0, 2.0, 3.0]);
        assert_eq!(record.radius, 4.0);
        assert_eq!(record.color, [10.0, 0.5, 0.0]);
        assert_eq!(record._pad, 0.0);
    }

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let constants = ObjectConstants::new(Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0)), Vec3::ONE);
        assert!((constants.normal[0][0] - 0.5).abs() < 1e-6);
        assert_eq!(constants.color, [1.0, 1.0, 1.0, 1.0]);
    }
}
