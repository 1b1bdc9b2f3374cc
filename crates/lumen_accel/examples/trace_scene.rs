//! Builds a BVH over a procedural Cornell-box scene and traces primary and
//! shadow rays against it with both split heuristics.
//!
//! Usage: `cargo run --release --example trace_scene [config.json]`
//!
//! The optional JSON file overrides `BvhConfig` fields, e.g.
//! `{ "leaf_threshold": 2, "sah_bins": 32 }`.

use std::fs::File;
use std::io::BufReader;
use std::time::Instant;

use anyhow::{ensure, Context, Result};
use lumen_accel::{intersect_brute_force, BvhConfig, QueryMode, SceneAccel, SplitHeuristic};
use lumen_core::{Material, Mesh, Scene};
use lumen_math::{Ray, Vec3};
use rayon::prelude::*;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 320;
const SHADOW_EPSILON: f32 = 1e-3;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let file = File::open(&path).with_context(|| format!("Failed to open {path}"))?;
            serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("Failed to parse BVH config from {path}"))?
        }
        None => BvhConfig::default(),
    };
    log::info!("BVH config: {}", serde_json::to_string(&config)?);

    let start = Instant::now();
    let (scene, light_center) = build_scene()?;
    log::info!(
        "Scene built in {:?}: {} primitives, {} emissive",
        start.elapsed(),
        scene.primitive_count(),
        scene.emissive_primitives().len()
    );

    for heuristic in [SplitHeuristic::Midpoint, SplitHeuristic::Sah] {
        let accel = SceneAccel::from_scene(&scene, &config.with_heuristic(heuristic));
        trace(&accel, &scene, light_center)?;
        spot_check(&accel)?;
    }

    Ok(())
}

/// Cornell box with two blocks, a sphere and a tessellated floor.
fn build_scene() -> Result<(Scene, Vec3)> {
    let mut scene = Scene::new();
    let white = scene.add_material(Material::diffuse("white", Vec3::new(0.73, 0.73, 0.73)));
    let red = scene.add_material(Material::diffuse("red", Vec3::new(0.65, 0.05, 0.05)));
    let green = scene.add_material(Material::diffuse("green", Vec3::new(0.12, 0.45, 0.15)));
    let light = scene.add_material(Material::emissive("light", Vec3::splat(15.0)));
    let metal = scene.add_material(Material::metal("aluminium", Vec3::new(0.8, 0.85, 0.88), 0.1));

    let s = 555.0;

    let p = |x: f32, y: f32, z: f32| Vec3::new(x, y, z);
    let walls = [
        (Mesh::quad(p(s, 0.0, 0.0), p(s, s, 0.0), p(s, s, s), p(s, 0.0, s)), green),
        (Mesh::quad(p(0.0, 0.0, 0.0), p(0.0, 0.0, s), p(0.0, s, s), p(0.0, s, 0.0)), red),
        (Mesh::quad(p(0.0, s, 0.0), p(0.0, s, s), p(s, s, s), p(s, s, 0.0)), white),
        (Mesh::quad(p(0.0, 0.0, s), p(s, 0.0, s), p(s, s, s), p(0.0, s, s)), white),
    ];
    for (wall, material) in &walls {
        scene.add_mesh(wall, *material)?;
    }
    scene.add_mesh(&floor_grid(s, 96)?, white)?;

    let light_quad = Mesh::quad(
        Vec3::new(213.0, s - 1.0, 227.0),
        Vec3::new(343.0, s - 1.0, 227.0),
        Vec3::new(343.0, s - 1.0, 332.0),
        Vec3::new(213.0, s - 1.0, 332.0),
    );
    scene.add_mesh(&light_quad, light)?;

    let tall_block = Mesh::cuboid(p(265.0, 0.0, 295.0), p(430.0, 330.0, 460.0));
    let short_block = Mesh::cuboid(p(130.0, 0.0, 65.0), p(295.0, 165.0, 230.0));
    scene.add_mesh(&tall_block, white)?;
    scene.add_mesh(&short_block, white)?;
    scene.add_sphere(Vec3::new(190.0, 255.0, 150.0), 90.0, metal)?;

    Ok((scene, Vec3::new(278.0, s - 2.0, 279.5)))
}

/// Floor of `n x n` quads, slightly displaced so the triangles are not
/// coplanar.
fn floor_grid(size: f32, n: u32) -> Result<Mesh> {
    let step = size / n as f32;
    let height = |i: u32, j: u32| ((i * 7 + j * 13) % 5) as f32 * 0.2;

    let mut positions = Vec::with_capacity(((n + 1) * (n + 1)) as usize);
    for j in 0..=n {
        for i in 0..=n {
            positions.push(Vec3::new(i as f32 * step, height(i, j), j as f32 * step));
        }
    }

    let mut indices = Vec::with_capacity((n * n * 6) as usize);
    for j in 0..n {
        for i in 0..n {
            let v0 = j * (n + 1) + i;
            let v1 = v0 + 1;
            let v2 = v0 + n + 1;
            let v3 = v2 + 1;
            indices.extend_from_slice(&[v0, v2, v1, v1, v2, v3]);
        }
    }

    Ok(Mesh::new(positions, indices)?)
}

fn camera_ray(x: u32, y: u32) -> Ray {
    let look_from = Vec3::new(278.0, 278.0, -800.0);
    let half_height = (40.0f32.to_radians() * 0.5).tan();
    let u = ((x as f32 + 0.5) / WIDTH as f32 * 2.0 - 1.0) * half_height;
    let v = (1.0 - (y as f32 + 0.5) / HEIGHT as f32 * 2.0) * half_height;
    Ray::new(look_from, Vec3::new(u, v, 1.0))
}

#[derive(Default)]
struct TraceCounts {
    hits: u64,
    lit: u64,
    emissive: u64,
}

fn trace(accel: &SceneAccel, scene: &Scene, light_center: Vec3) -> Result<()> {
    let start = Instant::now();

    let counts = (0..WIDTH * HEIGHT)
        .into_par_iter()
        .map(|pixel| -> Result<TraceCounts> {
            let ray = camera_ray(pixel % WIDTH, pixel / WIDTH);
            let mut counts = TraceCounts::default();

            let Some(hit) = accel.intersect_closest(&ray)? else {
                return Ok(counts);
            };
            counts.hits = 1;
            if scene.is_emissive(hit.primitive_id) {
                counts.emissive = 1;
                return Ok(counts);
            }

            let Some(frame) = accel.surface_frame(&ray, &hit) else {
                return Ok(counts);
            };
            let origin = frame.point + frame.normal * SHADOW_EPSILON;
            if !accel.intersect_any(&Ray::segment(origin, light_center, SHADOW_EPSILON))? {
                counts.lit = 1;
            }
            Ok(counts)
        })
        .try_reduce(TraceCounts::default, |a, b| {
            Ok(TraceCounts {
                hits: a.hits + b.hits,
                lit: a.lit + b.lit,
                emissive: a.emissive + b.emissive,
            })
        })?;

    let elapsed = start.elapsed();
    let stats = &accel.report().stats;
    let rays = u64::from(WIDTH * HEIGHT) + counts.hits - counts.emissive;
    log::info!(
        "{} nodes / {} leaves / depth {}: traced {} rays in {:.2?} ({:.2} Mrays/s)",
        stats.node_count,
        stats.leaf_count,
        stats.max_depth,
        rays,
        elapsed,
        rays as f64 / elapsed.as_secs_f64() / 1e6
    );
    log::info!(
        "{} primary hits, {} directly lit, {} on the light",
        counts.hits,
        counts.lit,
        counts.emissive
    );
    Ok(())
}

/// Compare a sample of primary rays against an exhaustive search.
fn spot_check(accel: &SceneAccel) -> Result<()> {
    for pixel in (0..WIDTH * HEIGHT).step_by(397) {
        let ray = camera_ray(pixel % WIDTH, pixel / WIDTH);
        let expected = intersect_brute_force(accel.store(), &ray, QueryMode::ClosestHit)?;
        let actual = accel.intersect_closest(&ray)?;
        ensure!(
            expected.map(|h| h.primitive_id) == actual.map(|h| h.primitive_id),
            "BVH and brute force disagree for pixel {pixel}: {actual:?} vs {expected:?}"
        );
    }
    log::debug!("Spot check passed");
    Ok(())
}
