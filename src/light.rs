use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Omnidirectional light with a finite attenuation radius.
///
/// Colors are HDR and never clamped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointLight {
    position: Vec3,
    radius: f32,
    color: Vec3,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            radius: 10.0,
            color: Vec3::ONE,
        }
    }
}

impl PointLight {
    pub fn new(position: Vec3, radius: f32, color: Vec3) -> Self {
        Self {
            position,
            radius,
            color,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn color(&self) -> Vec3 {
        self.color
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    pub fn set_radius(&mut self, radius: f32) {
        self.radius = radius;
    }

    pub fn set_color(&mut self, color: Vec3) {
        self.color = color;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_is_not_clamped() {
        let mut light = PointLight::default();
        light.set_color(Vec3::new(25.0, 0.0, 3.5));
        assert_eq!(light.color(), Vec3::new(25.0, 0.0, 3.5));
    }
}
