use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use glam::{Vec2, Vec3};

use crate::geometry::{MeshData, Vertex};

/// Reads and parses a Wavefront OBJ file from disk.
pub fn load_obj(path: impl AsRef<Path>) -> Result<MeshData> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read mesh {}", path.display()))?;
    load_obj_from_str(&data).with_context(|| format!("failed to parse mesh {}", path.display()))
}

/// Parses an OBJ file from memory into an indexed triangle mesh.
///
/// Polygons are fanned into triangles. Vertices without a normal get a
/// smoothed face normal, and tangents are derived from the texture
/// coordinates. Material and grouping statements are ignored.
pub fn load_obj_from_str(data: &str) -> Result<MeshData> {
    let mut positions = Vec::new();
    let mut texcoords = Vec::new();
    let mut normals = Vec::new();
    let mut faces: Vec<[FaceIndex; 3]> = Vec::new();

    for (line_no, line) in data.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        let Some(tag) = parts.next() else {
            continue;
        };
        match tag {
            "v" => positions.push(
                parse_vec3(parts)
                    .with_context(|| format!("invalid vertex on line {}", line_no + 1))?,
            ),
            "vt" => texcoords.push(
                parse_vec2(parts)
                    .with_context(|| format!("invalid texcoord on line {}", line_no + 1))?,
            ),
            "vn" => normals.push(
                parse_vec3(parts)
                    .with_context(|| format!("invalid normal on line {}", line_no + 1))?,
            ),
            "f" => {
                let polygon = parse_face(parts)
                    .with_context(|| format!("invalid face on line {}", line_no + 1))?;
                triangulate_face(&polygon, &mut faces);
            }
            _ => {}
        }
    }

    if positions.is_empty() {
        return Err(anyhow!("OBJ file does not define any vertices"));
    }
    if faces.is_empty() {
        return Err(anyhow!("OBJ file does not define any faces"));
    }

    let (mut mesh, missing_normals) = build_mesh(&positions, &texcoords, &normals, &faces)?;
    if missing_normals.iter().any(|&missing| missing) {
        compute_normals(&mut mesh, &missing_normals);
    }
    mesh.generate_tangents();
    Ok(mesh)
}

fn next_component<'a>(parts: &mut impl Iterator<Item = &'a str>) -> Result<f32> {
    let component = parts
        .next()
        .ok_or_else(|| anyhow!("missing vector component"))?;
    component
        .parse::<f32>()
        .with_context(|| format!("invalid number {component:?}"))
}

fn parse_vec3<'a>(mut parts: impl Iterator<Item = &'a str>) -> Result<Vec3> {
    let x = next_component(&mut parts)?;
    let y = next_component(&mut parts)?;
    let z = next_component(&mut parts)?;
    Ok(Vec3::new(x, y, z))
}

fn parse_vec2<'a>(mut parts: impl Iterator<Item = &'a str>) -> Result<Vec2> {
    let u = next_component(&mut parts)?;
    // `vt u` alone is legal; v defaults to zero.
    let v = match parts.next() {
        Some(component) => component
            .parse::<f32>()
            .with_context(|| format!("invalid number {component:?}"))?,
        None => 0.0,
    };
    Ok(Vec2::new(u, v))
}

fn parse_optional_index(segment: Option<&str>) -> Result<i32> {
    match segment {
        None | Some("") => Ok(0),
        Some(value) => value
            .parse::<i32>()
            .with_context(|| format!("invalid index {value:?}")),
    }
}

fn parse_face<'a>(parts: impl Iterator<Item = &'a str>) -> Result<Vec<FaceIndex>> {
    let mut indices = Vec::new();
    for part in parts {
        let mut segments = part.split('/');
        let v = segments
            .next()
            .ok_or_else(|| anyhow!("missing vertex index"))?
            .parse::<i32>()
            .with_context(|| format!("invalid face element {part:?}"))?;
        let vt = parse_optional_index(segments.next())?;
        let vn = parse_optional_index(segments.next())?;
        indices.push(FaceIndex { v, vt, vn });
    }
    if indices.len() < 3 {
        return Err(anyhow!("faces must reference at least 3 vertices"));
    }
    Ok(indices)
}

fn triangulate_face(polygon: &[FaceIndex], faces: &mut Vec<[FaceIndex; 3]>) {
    for i in 1..polygon.len().saturating_sub(1) {
        faces.push([polygon[0], polygon[i], polygon[i + 1]]);
    }
}

/// Unique attribute combination; each one becomes one output vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Key {
    position: usize,
    texcoord: Option<usize>,
    normal: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct FaceIndex {
    v: i32,
    vt: i32,
    vn: i32,
}

fn build_mesh(
    positions: &[Vec3],
    texcoords: &[Vec2],
    normals: &[Vec3],
    faces: &[[FaceIndex; 3]],
) -> Result<(MeshData, Vec<bool>)> {
    let mut lookup: HashMap<Key, u32> = HashMap::new();
    let mut mesh = MeshData::default();
    let mut missing_normals = Vec::new();

    for face in faces {
        for idx in face {
            let position = fix_index(idx.v, positions.len())
                .ok_or_else(|| anyhow!("vertex index {} out of range", idx.v))?;
            let key = Key {
                position,
                texcoord: resolve_optional(idx.vt, texcoords.len(), "texcoord")?,
                normal: resolve_optional(idx.vn, normals.len(), "normal")?,
            };
            let next_index = mesh.vertices.len() as u32;
            let entry = *lookup.entry(key).or_insert_with(|| {
                let uv = key.texcoord.map_or(Vec2::ZERO, |i| texcoords[i]);
                let normal = key.normal.map_or(Vec3::ZERO, |i| normals[i]);
                // OBJ puts v = 0 at the bottom of the image.
                let uv = Vec2::new(uv.x, 1.0 - uv.y);
                mesh.vertices
                    .push(Vertex::new(positions[position], normal, uv));
                missing_normals.push(key.normal.is_none());
                next_index
            });
            mesh.indices.push(entry);
        }
    }

    Ok((mesh, missing_normals))
}

/// Like [`fix_index`], but only 0 may be absent; anything else must resolve.
fn resolve_optional(index: i32, len: usize, kind: &str) -> Result<Option<usize>> {
    if index == 0 {
        return Ok(None);
    }
    fix_index(index, len)
        .map(Some)
        .ok_or_else(|| anyhow!("{kind} index {index} out of range"))
}

/// Resolves a 1-based (or negative, end-relative) OBJ index; 0 means absent.
fn fix_index(index: i32, len: usize) -> Option<usize> {
    if index > 0 {
        let zero_based = index as usize - 1;
        (zero_based < len).then_some(zero_based)
    } else if index < 0 {
        let abs = index.unsigned_abs() as usize;
        (abs <= len).then_some(len - abs)
    } else {
        None
    }
}

fn compute_normals(mesh: &mut MeshData, missing: &[bool]) {
    let mut accum = vec![Vec3::ZERO; mesh.vertices.len()];

    for triangle in mesh.indices.chunks_exact(3) {
        let [i0, i1, i2] = [triangle[0], triangle[1], triangle[2]].map(|i| i as usize);
        let p0 = Vec3::from(mesh.vertices[i0].position);
        let p1 = Vec3::from(mesh.vertices[i1].position);
        let p2 = Vec3::from(mesh.vertices[i2].position);
        if let Some(normal) = (p1 - p0).cross(p2 - p0).try_normalize() {
            accum[i0] += normal;
            accum[i1] += normal;
            accum[i2] += normal;
        }
    }

    for ((vertex, normal), &missing) in mesh.vertices.iter_mut().zip(accum).zip(missing) {
        if missing {
            vertex.normal = normal.normalize_or_zero().into();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_triangle() {
        let obj = "\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
        let mesh = load_obj_from_str(obj).unwrap();
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        assert_eq!(mesh.vertices.len(), 3);
    }

    #[test]
    fn computes_missing_normals() {
        let obj = "\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
        let mesh = load_obj_from_str(obj).unwrap();
        for vertex in &mesh.vertices {
            let normal = Vec3::from(vertex.normal);
            assert!(normal.abs_diff_eq(Vec3::Z, 1e-5));
        }
    }

    #[test]
    fn keeps_explicit_normals_and_flips_v() {
        let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0 0\nvt 1 0\nvt 0 1\nvn 0 0 -1\nf 1/1/1 2/2/1 3/3/1\n";
        let mesh = load_obj_from_str(obj).unwrap();
        assert_eq!(mesh.vertices[0].normal, [0.0, 0.0, -1.0]);
        assert_eq!(mesh.vertices[0].uv, [0.0, 1.0]);
        assert_eq!(mesh.vertices[2].uv, [0.0, 0.0]);
    }

    #[test]
    fn quads_are_fanned_and_shared_corners_deduplicated() {
        let obj = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n";
        let mesh = load_obj_from_str(obj).unwrap();
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(mesh.vertices.len(), 4);
    }

    #[test]
    fn negative_indices_count_from_the_end() {
        let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n";
        let mesh = load_obj_from_str(obj).unwrap();
        assert_eq!(mesh.vertices[2].position, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn tangents_follow_texture_u_axis() {
        let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0 0\nvt 1 0\nvt 0 1\nf 1/1 2/2 3/3\n";
        let mesh = load_obj_from_str(obj).unwrap();
        for vertex in &mesh.vertices {
            assert!(Vec3::from(vertex.tangent).abs_diff_eq(Vec3::X, 1e-5));
        }
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let err = load_obj_from_str("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 9\n").unwrap_err();
        assert!(format!("{err:#}").contains("out of range"));
    }

    #[test]
    fn out_of_range_texcoord_and_normal_indices_are_errors() {
        let base = "v 0 0 0\nv 1 0 0\nv 0 1 0\n";
        let err = load_obj_from_str(&format!("{base}f 1/7 2/7 3/7\n")).unwrap_err();
        assert!(format!("{err:#}").contains("texcoord index 7 out of range"));
        let err = load_obj_from_str(&format!("{base}vt 0 0\nf 1/1/9 2/1/9 3/1/9\n")).unwrap_err();
        assert!(format!("{err:#}").contains("normal index 9 out of range"));
    }

    #[test]
    fn vertices_without_faces_are_rejected() {
        let err = load_obj_from_str("v 0 0 0\nv 1 0 0\nv 0 1 0\n").unwrap_err();
        assert!(format!("{err:#}").contains("does not define any faces"));
    }

    #[test]
    fn malformed_line_reports_its_number() {
        let err = load_obj_from_str("v 0 0 0\nv 1 nope 0\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(load_obj_from_str("# nothing\n").is_err());
    }
}
