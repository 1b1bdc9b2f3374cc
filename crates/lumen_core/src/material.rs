//! Renderer material parameters.
//!
//! The acceleration core never interprets materials; the scene only maps
//! primitive ids to an index into its material table and exposes which
//! primitives emit light.

use lumen_math::Vec3;

/// Reflectance model selected for a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrdfKind {
    #[default]
    Uninitialized,
    CookTorrance,
    SpecularFresnel,
}

/// Shading parameters of a surface.
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    /// Material name (for logs and debugging)
    pub name: String,

    pub brdf: BrdfKind,

    /// Emitted radiance (RGB). Non-zero marks the material as a light.
    pub emission: Vec3,

    /// Diffuse/albedo color (RGB, 0-1)
    pub diffuse: Vec3,

    pub metalness: f32,
    pub roughness: f32,
    pub ior: f32,
    pub transmission_factor: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::new(),
            brdf: BrdfKind::Uninitialized,
            emission: Vec3::ZERO,
            diffuse: Vec3::new(1.0, 0.2, 0.7), // Loud pink so missing materials stand out
            metalness: 0.0,
            roughness: 1.0,
            ior: 1.4,
            transmission_factor: 0.0,
        }
    }
}

impl Material {
    /// Create a rough Cook-Torrance material with a diffuse color.
    pub fn diffuse(name: impl Into<String>, diffuse: Vec3) -> Self {
        Self {
            name: name.into(),
            brdf: BrdfKind::CookTorrance,
            diffuse,
            ..Default::default()
        }
    }

    /// Create a light-emitting material.
    pub fn emissive(name: impl Into<String>, emission: Vec3) -> Self {
        Self {
            name: name.into(),
            brdf: BrdfKind::CookTorrance,
            emission,
            diffuse: Vec3::ZERO,
            ..Default::default()
        }
    }

    /// Create a metallic material.
    pub fn metal(name: impl Into<String>, albedo: Vec3, roughness: f32) -> Self {
        Self {
            name: name.into(),
            brdf: BrdfKind::CookTorrance,
            diffuse: albedo,
            metalness: 1.0,
            roughness,
            ..Default::default()
        }
    }

    /// True if any emission channel is non-zero.
    pub fn is_emissive(&self) -> bool {
        self.emission != Vec3::ZERO
    }
}
