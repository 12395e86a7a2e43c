//! Minimal forward renderer for XML-described scenes.
//!
//! A [`Scene`] owns objects, point lights, a camera and a sun. Each frame it
//! uploads one frame block and one light array through a [`RenderDevice`],
//! then draws every object that survives frustum culling. The device is a
//! trait so the same traversal drives both the wgpu [`Renderer`] and the
//! in-memory [`RecordingDevice`] used for headless runs and tests.

pub mod camera;
pub mod geometry;
pub mod gpu;
pub mod light;
pub mod obj;
pub mod object;
pub mod render;
pub mod scene;
pub mod scene_file;
pub mod settings;
pub mod shader_structs;

pub use camera::{Camera, Frustum, Perspective, Plane};
pub use geometry::{BoundingSphere, GeometryBuffer, MeshData, Vertex};
pub use gpu::{BufferHandle, BufferMapping, BufferUsage, RenderDevice, TypedBuffer};
pub use light::PointLight;
pub use obj::{load_obj, load_obj_from_str};
pub use object::{model_matrix, Material, RenderableObject};
pub use render::{Command, RecordingDevice, Renderer, RendererError};
pub use scene::{FrameStats, Scene};
pub use scene_file::{CameraDescription, ObjectDescription, SceneDescription, SunDescription};
pub use settings::RenderSettings;
pub use shader_structs::{FrameData, GpuPointLight, ObjectConstants};
