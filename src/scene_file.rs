use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use glam::Vec3;
use log::debug;
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};

use crate::camera::Perspective;
use crate::geometry::{GeometryBuffer, MeshData};
use crate::gpu::RenderDevice;
use crate::light::PointLight;
use crate::obj::load_obj;
use crate::object::{model_matrix, Material, RenderableObject};
use crate::scene::Scene;

/// Parsed scene file, independent of any device.
///
/// ```xml
/// <scene>
///   <sun><direction>0.2 1 0.1</direction><color>1 1 1</color></sun>
///   <camera><position>0 2 6</position><target>0 0 0</target><fov>60</fov></camera>
///   <object><name>Floor</name><mesh>floor.obj</mesh><scale>10 0.1 10</scale></object>
///   <light><position>0 3 0</position><radius>8</radius><color>4 3 2</color></light>
/// </scene>
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SceneDescription {
    pub sun: SunDescription,
    pub camera: CameraDescription,
    pub objects: Vec<ObjectDescription>,
    pub lights: Vec<PointLight>,
    /// Directory mesh paths are resolved against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SunDescription {
    pub direction: Vec3,
    pub color: Vec3,
}

impl Default for SunDescription {
    fn default() -> Self {
        Self {
            direction: Vec3::new(0.2, 1.0, 0.1),
            color: Vec3::ONE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraDescription {
    pub position: Vec3,
    pub target: Vec3,
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraDescription {
    fn default() -> Self {
        let perspective = Perspective::default();
        Self {
            position: Vec3::new(0.0, 2.0, 6.0),
            target: Vec3::ZERO,
            fov: perspective.fov_y.to_degrees(),
            near: perspective.near,
            far: perspective.far,
        }
    }
}

/// One `<object>` entry. Objects without a mesh use the built-in cube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDescription {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh: Option<String>,
    #[serde(default)]
    pub position: Vec3,
    /// XYZ Euler angles in degrees.
    #[serde(default)]
    pub rotation: Vec3,
    #[serde(default = "default_scale")]
    pub scale: Vec3,
    #[serde(default = "default_color")]
    pub color: Vec3,
}

impl Default for ObjectDescription {
    fn default() -> Self {
        Self {
            name: String::new(),
            mesh: None,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: default_scale(),
            color: default_color(),
        }
    }
}

fn default_color() -> Vec3 {
    Vec3::ONE
}

fn default_scale() -> Vec3 {
    Vec3::ONE
}

impl SceneDescription {
    /// Reads a scene file; relative mesh paths resolve against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scene {}", path.display()))?;
        let mut description = Self::from_xml(&xml)
            .with_context(|| format!("failed to parse scene {}", path.display()))?;
        description.base_dir = path.parent().map(Path::to_path_buf);
        Ok(description)
    }

    /// Parses scene XML. Colors are linear floats and may exceed 1.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let document = Document::parse(xml).context("invalid scene XML")?;
        let root = document.root_element();
        if !root.has_tag_name("scene") {
            return Err(anyhow!(
                "expected <scene> root element, found <{}>",
                root.tag_name().name()
            ));
        }

        let mut description = Self::default();

        if let Some(node) = child(&root, "sun") {
            let sun = &mut description.sun;
            sun.direction = parse_vec3(optional_text(&node, "direction"), sun.direction)
                .context("invalid <sun> direction")?;
            sun.color = parse_vec3(optional_text(&node, "color"), sun.color)
                .context("invalid <sun> color")?;
        }

        if let Some(node) = child(&root, "camera") {
            let camera = &mut description.camera;
            camera.position = parse_vec3(optional_text(&node, "position"), camera.position)
                .context("invalid <camera> position")?;
            camera.target = parse_vec3(optional_text(&node, "target"), camera.target)
                .context("invalid <camera> target")?;
            camera.fov = parse_f32(optional_text(&node, "fov"), camera.fov)
                .context("invalid <camera> fov")?;
            camera.near = parse_f32(optional_text(&node, "near"), camera.near)
                .context("invalid <camera> near")?;
            camera.far = parse_f32(optional_text(&node, "far"), camera.far)
                .context("invalid <camera> far")?;
        }

        for node in root.children().filter(|n| n.has_tag_name("object")) {
            let object = parse_object(&node).with_context(|| {
                format!(
                    "invalid <object> {}",
                    optional_text(&node, "name").unwrap_or_default()
                )
            })?;
            description.objects.push(object);
        }

        for (index, node) in root
            .children()
            .filter(|n| n.has_tag_name("light"))
            .enumerate()
        {
            let light = parse_light(&node).with_context(|| format!("invalid <light> #{index}"))?;
            description.lights.push(light);
        }

        Ok(description)
    }

    /// Uploads every mesh once and builds the runtime scene.
    ///
    /// Objects naming the same mesh share one [`GeometryBuffer`].
    pub fn instantiate(&self, device: &mut dyn RenderDevice, aspect: f32) -> Result<Scene> {
        let mut scene = Scene::new();
        scene.set_sun(self.sun.direction, self.sun.color);

        let camera = scene.camera_mut();
        camera.look_at(self.camera.position, self.camera.target, Vec3::Y);
        camera.set_perspective(Perspective {
            fov_y: self.camera.fov.to_radians(),
            aspect,
            near: self.camera.near,
            far: self.camera.far,
        });

        let mut meshes: HashMap<String, Arc<GeometryBuffer>> = HashMap::new();
        let mut cube: Option<Arc<GeometryBuffer>> = None;

        for object in &self.objects {
            let geometry = match &object.mesh {
                Some(mesh) => match meshes.get(mesh) {
                    Some(geometry) => Arc::clone(geometry),
                    None => {
                        let path = self.resolve(mesh);
                        debug!("loading mesh {}", path.display());
                        let data = load_obj(&path)
                            .with_context(|| format!("object {} has an unusable mesh", object.name))?;
                        let geometry = Arc::new(GeometryBuffer::new(device, &data, mesh));
                        meshes.insert(mesh.clone(), Arc::clone(&geometry));
                        geometry
                    }
                },
                None => Arc::clone(cube.get_or_insert_with(|| {
                    Arc::new(GeometryBuffer::new(device, &MeshData::cube(), "builtin-cube"))
                })),
            };
            let transform = model_matrix(object.position, object.rotation, object.scale);
            scene.add_object(
                RenderableObject::new(geometry, Arc::new(Material::new(object.color)))
                    .with_transform(transform),
            );
        }

        for light in &self.lights {
            scene.add_light(*light);
        }

        Ok(scene)
    }

    fn resolve(&self, mesh: &str) -> PathBuf {
        match &self.base_dir {
            Some(base) => base.join(mesh),
            None => PathBuf::from(mesh),
        }
    }
}

fn parse_object(node: &Node<'_, '_>) -> Result<ObjectDescription> {
    let mut object = ObjectDescription {
        name: required_text(node, "name")?,
        mesh: optional_text(node, "mesh"),
        ..ObjectDescription::default()
    };
    object.position = parse_vec3(optional_text(node, "position"), object.position)?;
    object.rotation = parse_vec3(optional_text(node, "rotation"), object.rotation)?;
    object.scale = parse_vec3(optional_text(node, "scale"), object.scale)?;
    object.color = parse_vec3(optional_text(node, "color"), object.color)?;
    Ok(object)
}

fn parse_light(node: &Node<'_, '_>) -> Result<PointLight> {
    let defaults = PointLight::default();
    Ok(PointLight::new(
        parse_vec3(optional_text(node, "position"), defaults.position())?,
        parse_f32(optional_text(node, "radius"), defaults.radius())?,
        parse_vec3(optional_text(node, "color"), defaults.color())?,
    ))
}

fn child<'a, 'input>(node: &Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|c| c.has_tag_name(tag))
}

fn required_text(node: &Node<'_, '_>, tag: &str) -> Result<String> {
    optional_text(node, tag).ok_or_else(|| anyhow!("<{tag}> tag is missing"))
}

fn optional_text(node: &Node<'_, '_>, tag: &str) -> Option<String> {
    child(node, tag)
        .and_then(|c| c.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(|text| text.to_string())
}

fn parse_vec3(value: Option<String>, default: Vec3) -> Result<Vec3> {
    let Some(value) = value else {
        return Ok(default);
    };
    let components = value
        .split_whitespace()
        .map(|component| {
            component
                .parse::<f32>()
                .map_err(|err| anyhow!("failed to parse {component:?}: {err}"))
        })
        .collect::<Result<Vec<_>>>()?;
    match components.as_slice() {
        [x, y, z] => Ok(Vec3::new(*x, *y, *z)),
        _ => Err(anyhow!(
            "expected 3 vector components, found {}",
            components.len()
        )),
    }
}

fn parse_f32(value: Option<String>, default: f32) -> Result<f32> {
    match value {
        Some(value) => value
            .parse::<f32>()
            .map_err(|err| anyhow!("failed to parse float: {err}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::render::headless::RecordingDevice;

    const SAMPLE: &str = r#"
    <scene>
        <sun>
            <direction>0 1 0</direction>
            <color>3 2.5 2</color>
        </sun>
        <camera>
            <position>0 0 10</position>
            <target>0 0 0</target>
            <fov>90</fov>
        </camera>
        <object>
            <name>Box</name>
            <position>1 2 3</position>
            <color>0.5 0 0</color>
        </object>
        <object>
            <name>Other</name>
            <scale>2 2 2</scale>
        </object>
        <light>
            <position>0 5 0</position>
            <radius>12</radius>
            <color>8 4 0</color>
        </light>
    </scene>
    "#;

    #[test]
    fn parse_scene_populates_all_sections() {
        let description = SceneDescription::from_xml(SAMPLE).unwrap();
        assert_eq!(description.sun.color, Vec3::new(3.0, 2.5, 2.0));
        assert_eq!(description.camera.fov, 90.0);
        assert_eq!(description.camera.far, 100.0);
        assert_eq!(description.objects.len(), 2);
        assert_eq!(description.objects[0].name, "Box");
        assert_eq!(description.objects[0].position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(description.objects[1].color, Vec3::ONE);
        assert_eq!(description.lights.len(), 1);
        assert_eq!(description.lights[0].radius(), 12.0);
        assert_eq!(description.lights[0].color(), Vec3::new(8.0, 4.0, 0.0));
    }

    #[test]
    fn missing_sections_take_defaults() {
        let description = SceneDescription::from_xml("<scene/>").unwrap();
        assert_eq!(description.sun, SunDescription::default());
        assert_eq!(description.camera, CameraDescription::default());
        assert!(description.objects.is_empty());
    }

    #[test]
    fn object_without_name_is_rejected() {
        let err = SceneDescription::from_xml("<scene><object><mesh>a.obj</mesh></object></scene>")
            .unwrap_err();
        assert!(format!("{err:#}").contains("<name> tag is missing"));
    }

    #[test]
    fn short_vectors_are_rejected() {
        let xml = "<scene><light><position>1 2</position></light></scene>";
        assert!(SceneDescription::from_xml(xml).is_err());
    }

    #[test]
    fn wrong_root_is_rejected() {
        assert!(SceneDescription::from_xml("<world/>").is_err());
    }

    #[test]
    fn instantiate_shares_builtin_cube() {
        let description = SceneDescription::from_xml(SAMPLE).unwrap();
        let mut device = RecordingDevice::new();

        let scene = description.instantiate(&mut device, 1.5).unwrap();

        assert_eq!(scene.objects().len(), 2);
        assert!(Arc::ptr_eq(
            scene.objects()[0].geometry(),
            scene.objects()[1].geometry()
        ));
        // Vertex and index buffer of the single cube upload.
        assert_eq!(device.live_buffer_count(), 2);
        assert_eq!(scene.point_lights().len(), 1);
        assert_eq!(scene.sun_color(), Vec3::new(3.0, 2.5, 2.0));
        assert!(scene
            .camera()
            .position()
            .abs_diff_eq(Vec3::new(0.0, 0.0, 10.0), 1e-4));
        assert_eq!(scene.camera().perspective().map(|p| p.aspect), Some(1.5));
    }

    #[test]
    fn instantiate_loads_meshes_relative_to_scene_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut mesh = std::fs::File::create(dir.path().join("tri.obj")).unwrap();
        writeln!(mesh, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3").unwrap();
        let scene_path = dir.path().join("scene.xml");
        std::fs::write(
            &scene_path,
            "<scene>\
               <object><name>A</name><mesh>tri.obj</mesh></object>\
               <object><name>B</name><mesh>tri.obj</mesh></object>\
             </scene>",
        )
        .unwrap();

        let description = SceneDescription::load(&scene_path).unwrap();
        let mut device = RecordingDevice::new();
        let scene = description.instantiate(&mut device, 1.0).unwrap();

        assert_eq!(scene.objects()[0].geometry().index_count(), 3);
        assert!(Arc::ptr_eq(
            scene.objects()[0].geometry(),
            scene.objects()[1].geometry()
        ));
    }

    #[test]
    fn top_down_camera_still_draws() {
        let description = SceneDescription::from_xml(
            "<scene>\
               <camera><position>0 10 0</position><target>0 0 0</target></camera>\
               <object><name>Ground</name></object>\
             </scene>",
        )
        .unwrap();
        let mut device = RecordingDevice::new();
        let scene = description.instantiate(&mut device, 1.0).unwrap();

        assert!(scene.view_proj_matrix().is_finite());
        let stats = scene.render(&mut device, false);
        assert_eq!(stats.drawn, 1);
        assert_eq!(stats.culled, 0);
    }

    #[test]
    fn missing_mesh_names_the_object() {
        let description = SceneDescription::from_xml(
            "<scene><object><name>Ghost</name><mesh>nope.obj</mesh></object></scene>",
        )
        .unwrap();
        let mut device = RecordingDevice::new();
        let err = description.instantiate(&mut device, 1.0).unwrap_err();
        assert!(format!("{err:#}").contains("Ghost"));
    }
}
