use glam::{Mat4, Vec3, Vec4};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::geometry::BoundingSphere;

/// Perspective parameters kept so the projection can be rebuilt on resize.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Perspective {
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Perspective {
    fn default() -> Self {
        Self {
            fov_y: 60.0_f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Perspective {
    /// Right-handed projection with a `[0, 1]` depth range.
    pub fn matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect.max(0.01), self.near, self.far)
    }
}

/// View and projection state of the scene camera.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    view: Mat4,
    projection: Mat4,
    view_proj: Mat4,
    perspective: Option<Perspective>,
}

impl Default for Camera {
    fn default() -> Self {
        let perspective = Perspective::default();
        let view = Mat4::look_at_rh(Vec3::new(0.0, 2.0, 6.0), Vec3::ZERO, Vec3::Y);
        let projection = perspective.matrix();
        Self {
            view,
            projection,
            view_proj: projection * view,
            perspective: Some(perspective),
        }
    }
}

impl Camera {
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        Self {
            view,
            projection,
            view_proj: projection * view,
            perspective: None,
        }
    }

    pub fn set_view(&mut self, view: Mat4) {
        self.view = view;
        self.update();
    }

    /// Replaces the projection with an arbitrary matrix. Aspect updates are
    /// ignored until [`Camera::set_perspective`] is called again.
    pub fn set_proj(&mut self, projection: Mat4) {
        self.projection = projection;
        self.perspective = None;
        self.update();
    }

    /// Points the camera from `eye` at `target`.
    ///
    /// When the view direction is parallel to `up`, another world axis is
    /// used as up so the view stays finite. A target equal to the eye is
    /// ignored.
    pub fn look_at(&mut self, eye: Vec3, target: Vec3, up: Vec3) {
        let Some(direction) = (target - eye).try_normalize() else {
            warn!("camera target {target} coincides with eye; view left unchanged");
            return;
        };
        let up = match up.try_normalize() {
            Some(up) if direction.cross(up).length_squared() > 1e-6 => up,
            _ => fallback_up(direction),
        };
        self.set_view(Mat4::look_at_rh(eye, target, up));
    }

    pub fn set_perspective(&mut self, perspective: Perspective) {
        self.projection = perspective.matrix();
        self.perspective = Some(perspective);
        self.update();
    }

    /// Rebuilds a perspective projection for a new viewport aspect ratio.
    pub fn set_aspect_ratio(&mut self, aspect: f32) {
        if let Some(mut perspective) = self.perspective {
            perspective.aspect = aspect;
            self.set_perspective(perspective);
        }
    }

    pub fn perspective(&self) -> Option<Perspective> {
        self.perspective
    }

    pub fn view_matrix(&self) -> &Mat4 {
        &self.view
    }

    pub fn projection_matrix(&self) -> &Mat4 {
        &self.projection
    }

    /// `projection * view`.
    pub fn view_proj_matrix(&self) -> &Mat4 {
        &self.view_proj
    }

    /// Eye position in world space.
    pub fn position(&self) -> Vec3 {
        self.view.inverse().w_axis.truncate()
    }

    /// Extracts the six clip planes of the current view-projection.
    pub fn build_frustum(&self) -> Frustum {
        Frustum::from_view_proj(&self.view_proj)
    }

    fn update(&mut self) {
        self.view_proj = self.projection * self.view;
    }
}

/// World axis least aligned with `direction`.
fn fallback_up(direction: Vec3) -> Vec3 {
    [Vec3::Y, Vec3::Z, Vec3::X]
        .into_iter()
        .min_by(|a, b| {
            a.dot(direction)
                .abs()
                .total_cmp(&b.dot(direction).abs())
        })
        .unwrap_or(Vec3::Z)
}

/// Half-space `normal · p + distance >= 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    fn from_coefficients(coefficients: Vec4) -> Self {
        let normal = coefficients.truncate();
        let length = normal.length();
        if length <= f32::EPSILON {
            return Self {
                normal,
                distance: coefficients.w,
            };
        }
        Self {
            normal: normal / length,
            distance: coefficients.w / length,
        }
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }
}

/// World-space view volume. Plane normals point inwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    pub const NEAR: usize = 0;
    pub const FAR: usize = 1;
    pub const LEFT: usize = 2;
    pub const RIGHT: usize = 3;
    pub const TOP: usize = 4;
    pub const BOTTOM: usize = 5;

    /// Gribb-Hartmann extraction for a `[0, 1]` clip-space depth range.
    pub fn from_view_proj(view_proj: &Mat4) -> Self {
        let [r0, r1, r2, r3] = [0, 1, 2, 3].map(|i| view_proj.row(i));
        Self {
            planes: [
                Plane::from_coefficients(r2),
                Plane::from_coefficients(r3 - r2),
                Plane::from_coefficients(r3 + r0),
                Plane::from_coefficients(r3 - r0),
                Plane::from_coefficients(r3 - r1),
                Plane::from_coefficients(r3 + r1),
            ],
        }
    }

    /// False only when a single plane fully excludes the sphere.
    pub fn intersects_sphere(&self, sphere: &BoundingSphere) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(sphere.center) >= -sphere.radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_at_origin() -> Camera {
        let mut camera = Camera::default();
        camera.look_at(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        camera.set_perspective(Perspective {
            fov_y: 90.0_f32.to_radians(),
            aspect: 1.0,
            near: 0.1,
            far: 100.0,
        });
        camera
    }

    fn sphere(center: Vec3, radius: f32) -> BoundingSphere {
        BoundingSphere { center, radius }
    }

    #[test]
    fn view_proj_is_projection_times_view() {
        let camera = Camera::default();
        let expected = *camera.projection_matrix() * *camera.view_matrix();
        assert!(camera.view_proj_matrix().abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn position_follows_look_at() {
        let mut camera = Camera::default();
        camera.look_at(Vec3::new(1.0, 2.0, 3.0), Vec3::new(1.0, 2.0, -7.0), Vec3::Y);
        assert!(camera.position().abs_diff_eq(Vec3::new(1.0, 2.0, 3.0), 1e-5));
    }

    #[test]
    fn look_at_along_up_axis_stays_finite() {
        let mut camera = Camera::default();
        camera.look_at(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO, Vec3::Y);
        assert!(camera.view_proj_matrix().is_finite());
        assert!(camera.position().abs_diff_eq(Vec3::new(0.0, 10.0, 0.0), 1e-4));

        let frustum = camera.build_frustum();
        assert!(frustum.intersects_sphere(&sphere(Vec3::ZERO, 0.5)));
        assert!(!frustum.intersects_sphere(&sphere(Vec3::new(0.0, 20.0, 0.0), 0.5)));
    }

    #[test]
    fn look_at_own_position_keeps_previous_view() {
        let mut camera = Camera::default();
        let before = *camera.view_matrix();
        camera.look_at(Vec3::ONE, Vec3::ONE, Vec3::Y);
        assert_eq!(*camera.view_matrix(), before);
    }

    #[test]
    fn frustum_planes_face_inwards() {
        let frustum = camera_at_origin().build_frustum();
        let near = frustum.planes[Frustum::NEAR];
        assert!(near.normal.abs_diff_eq(Vec3::NEG_Z, 1e-5));
        assert!((near.distance + 0.1).abs() < 1e-4);
        let far = frustum.planes[Frustum::FAR];
        assert!(far.normal.abs_diff_eq(Vec3::Z, 1e-5));
        assert!((far.distance - 100.0).abs() < 0.1);
        assert!(frustum.planes[Frustum::LEFT].normal.x > 0.0);
        assert!(frustum.planes[Frustum::RIGHT].normal.x < 0.0);
        assert!(frustum.planes[Frustum::TOP].normal.y < 0.0);
        assert!(frustum.planes[Frustum::BOTTOM].normal.y > 0.0);
    }

    #[test]
    fn sphere_classification() {
        let frustum = camera_at_origin().build_frustum();
        assert!(frustum.intersects_sphere(&sphere(Vec3::new(0.0, 0.0, -10.0), 1.0)));
        assert!(!frustum.intersects_sphere(&sphere(Vec3::new(0.0, 0.0, 10.0), 1.0)));
        assert!(!frustum.intersects_sphere(&sphere(Vec3::new(0.0, 0.0, -150.0), 1.0)));
        assert!(!frustum.intersects_sphere(&sphere(Vec3::new(30.0, 0.0, -10.0), 1.0)));
        // Straddles the right plane.
        assert!(frustum.intersects_sphere(&sphere(Vec3::new(10.5, 0.0, -10.0), 1.0)));
    }

    #[test]
    fn aspect_update_rebuilds_projection() {
        let mut camera = Camera::default();
        let before = *camera.projection_matrix();
        camera.set_aspect_ratio(1.0);
        assert_ne!(before, *camera.projection_matrix());
        assert_eq!(camera.perspective().map(|p| p.aspect), Some(1.0));

        camera.set_proj(Mat4::IDENTITY);
        camera.set_aspect_ratio(2.0);
        assert_eq!(*camera.projection_matrix(), Mat4::IDENTITY);
    }
}
