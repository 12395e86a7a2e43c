use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::gpu::{BufferUsage, RenderDevice, TypedBuffer, VERTEX_BUFFER_SLOT};

/// Interleaved vertex record, 44 bytes per vertex.
///
/// Attribute channels are positional: 0 position, 1 normal, 2 texcoord,
/// 3 tangent, at byte offsets 0, 12, 24 and 32.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub tangent: [f32; 3],
}

impl Vertex {
    pub const ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x2,
        3 => Float32x3
    ];

    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position: position.into(),
            normal: normal.into(),
            uv: uv.into(),
            tangent: [0.0; 3],
        }
    }

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Sphere enclosing a mesh, used for frustum tests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    /// Sphere centred on the bounding box of `points`.
    pub fn from_points(points: impl IntoIterator<Item = Vec3> + Clone) -> Self {
        let (min, max) = points
            .clone()
            .into_iter()
            .fold((Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)), |(min, max), p| {
                (min.min(p), max.max(p))
            });
        if min.x > max.x {
            return Self {
                center: Vec3::ZERO,
                radius: 0.0,
            };
        }
        let center = (min + max) * 0.5;
        let radius = points
            .into_iter()
            .map(|p| p.distance(center))
            .fold(0.0, f32::max);
        Self { center, radius }
    }

    /// Moves the sphere into the space of `transform`; the radius grows by
    /// the largest axis scale so the result still encloses the mesh.
    pub fn transformed(&self, transform: &Mat4) -> Self {
        let scale = transform
            .x_axis
            .truncate()
            .length()
            .max(transform.y_axis.truncate().length())
            .max(transform.z_axis.truncate().length());
        Self {
            center: transform.transform_point3(self.center),
            radius: self.radius * scale,
        }
    }
}

/// CPU-side mesh as produced by the loaders.
///
/// Indices are triangle-list triples; every index must be below
/// `vertices.len()`. That precondition is the loader's to uphold.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn bounding_sphere(&self) -> BoundingSphere {
        BoundingSphere::from_points(self.vertices.iter().map(|v| Vec3::from(v.position)))
    }

    /// Fills every vertex tangent from the triangle texture-space derivatives.
    ///
    /// Triangles with degenerate UVs contribute nothing; vertices left without
    /// a tangent get an arbitrary vector perpendicular to their normal.
    pub fn generate_tangents(&mut self) {
        let mut accum = vec![Vec3::ZERO; self.vertices.len()];

        for triangle in self.indices.chunks_exact(3) {
            let [i0, i1, i2] = [triangle[0], triangle[1], triangle[2]].map(|i| i as usize);
            let (v0, v1, v2) = (self.vertices[i0], self.vertices[i1], self.vertices[i2]);
            let e1 = Vec3::from(v1.position) - Vec3::from(v0.position);
            let e2 = Vec3::from(v2.position) - Vec3::from(v0.position);
            let d1 = Vec2::from(v1.uv) - Vec2::from(v0.uv);
            let d2 = Vec2::from(v2.uv) - Vec2::from(v0.uv);
            let det = d1.x * d2.y - d2.x * d1.y;
            if det.abs() <= f32::EPSILON {
                continue;
            }
            let tangent = (e1 * d2.y - e2 * d1.y) / det;
            accum[i0] += tangent;
            accum[i1] += tangent;
            accum[i2] += tangent;
        }

        for (vertex, tangent) in self.vertices.iter_mut().zip(accum) {
            let normal = Vec3::from(vertex.normal);
            // Gram-Schmidt against the normal.
            let tangent = (tangent - normal * normal.dot(tangent))
                .try_normalize()
                .unwrap_or_else(|| normal.any_orthonormal_vector());
            vertex.tangent = tangent.into();
        }
    }

    /// Unit cube centred on the origin, four vertices per face.
    pub fn cube() -> Self {
        const FACES: [(Vec3, Vec3, Vec3); 6] = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        ];
        const CORNERS: [(f32, f32); 4] = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

        let mut mesh = Self::default();
        for (normal, right, up) in FACES {
            let base = mesh.vertices.len() as u32;
            for (u, v) in CORNERS {
                let position = (normal + right * u + up * v) * 0.5;
                let uv = Vec2::new((u + 1.0) * 0.5, 1.0 - (v + 1.0) * 0.5);
                mesh.vertices.push(Vertex::new(position, normal, uv));
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        mesh.generate_tangents();
        mesh
    }
}

/// Device-resident vertex and index data for one mesh.
///
/// Immutable once built. Objects share it through `Arc`, so the buffers stay
/// alive for as long as any object refers to them.
#[derive(Debug)]
pub struct GeometryBuffer {
    vertex_buffer: TypedBuffer<Vertex>,
    index_buffer: TypedBuffer<u32>,
    bounds: BoundingSphere,
}

impl GeometryBuffer {
    pub fn new(device: &mut dyn RenderDevice, mesh: &MeshData, label: &str) -> Self {
        let vertex_buffer = TypedBuffer::from_slice(
            device,
            &format!("{label}-vertices"),
            BufferUsage::Attribute,
            &mesh.vertices,
        );
        let index_buffer = TypedBuffer::from_slice(
            device,
            &format!("{label}-indices"),
            BufferUsage::Index,
            &mesh.indices,
        );
        Self {
            vertex_buffer,
            index_buffer,
            bounds: mesh.bounding_sphere(),
        }
    }

    /// Binds both buffers and draws every index as a triangle list.
    ///
    /// An empty mesh issues nothing; backends cannot bind zero-sized buffers.
    pub fn draw(&self, device: &mut dyn RenderDevice) {
        if self.index_count() == 0 {
            return;
        }
        self.vertex_buffer
            .bind(device, BufferUsage::Attribute, VERTEX_BUFFER_SLOT);
        self.index_buffer.bind(device, BufferUsage::Index, 0);
        device.draw_indexed(self.index_count());
    }

    pub fn index_count(&self) -> u32 {
        self.index_buffer.element_count() as u32
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_buffer.element_count()
    }

    /// Object-space bounding sphere.
    pub fn bounds(&self) -> BoundingSphere {
        self.bounds
    }
}

#[cfg(test)]
mod tests {
    use std::mem::{offset_of, size_of};

    use super::*;
    use crate::render::headless::{Command, RecordingDevice};

    #[test]
    fn vertex_layout_matches_attribute_contract() {
        assert_eq!(size_of::<Vertex>(), 44);
        assert_eq!(offset_of!(Vertex, position), 0);
        assert_eq!(offset_of!(Vertex, normal), 12);
        assert_eq!(offset_of!(Vertex, uv), 24);
        assert_eq!(offset_of!(Vertex, tangent), 32);

        let layout = Vertex::layout();
        assert_eq!(layout.array_stride, 44);
        let offsets: Vec<_> = layout
            .attributes
            .iter()
            .map(|a| (a.shader_location, a.offset))
            .collect();
        assert_eq!(offsets, vec![(0, 0), (1, 12), (2, 24), (3, 32)]);
    }

    #[test]
    fn cube_is_well_formed() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        assert!(cube.indices.iter().all(|&i| (i as usize) < cube.vertices.len()));
        for vertex in &cube.vertices {
            let tangent = Vec3::from(vertex.tangent);
            assert!((tangent.length() - 1.0).abs() < 1e-5);
            assert!(tangent.dot(Vec3::from(vertex.normal)).abs() < 1e-5);
        }
        let bounds = cube.bounding_sphere();
        assert!(bounds.center.length() < 1e-6);
        assert!((bounds.radius - 0.75f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn transformed_sphere_uses_largest_scale() {
        let sphere = BoundingSphere {
            center: Vec3::ZERO,
            radius: 1.0,
        };
        let transform = Mat4::from_scale_rotation_translation(
            Vec3::new(1.0, 3.0, 2.0),
            glam::Quat::IDENTITY,
            Vec3::new(5.0, 0.0, 0.0),
        );
        let moved = sphere.transformed(&transform);
        assert_eq!(moved.center, Vec3::new(5.0, 0.0, 0.0));
        assert!((moved.radius - 3.0).abs() < 1e-6);
    }

    #[test]
    fn empty_mesh_draws_nothing() {
        let mut device = RecordingDevice::new();
        let geometry = GeometryBuffer::new(&mut device, &MeshData::default(), "empty");
        device.clear_commands();

        geometry.draw(&mut device);

        assert!(device.commands().is_empty());
    }

    #[test]
    fn draw_binds_vertices_then_indices_then_draws_all_indices() {
        let mut device = RecordingDevice::new();
        let geometry = GeometryBuffer::new(&mut device, &MeshData::cube(), "cube");
        device.clear_commands();

        geometry.draw(&mut device);

        let commands = device.commands();
        assert_eq!(commands.len(), 3);
        assert!(matches!(
            commands[0],
            Command::BindBuffer {
                usage: BufferUsage::Attribute,
                slot: VERTEX_BUFFER_SLOT,
                ..
            }
        ));
        assert!(matches!(
            commands[1],
            Command::BindBuffer {
                usage: BufferUsage::Index,
                ..
            }
        ));
        assert_eq!(commands[2], Command::DrawIndexed { index_count: 36 });
        assert_eq!(geometry.vertex_count(), 24);
    }
}
