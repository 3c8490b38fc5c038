//! Software snapshots of the scene: every node is drawn as a dot at its
//! translation, coloured by tag. No GPU readback is involved, so this works
//! the same in headless runs.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bevy::prelude::*;
use image::{codecs::png::PngEncoder, ColorType, ImageEncoder, Rgba, RgbaImage};

use super::types::{OperationResult, Params};
use crate::error::{BridgeError, BridgeResult};
use crate::scripting::engine::{snapshot_world, NodeSnapshot};

const DEFAULT_SIZE: usize = 256;
const MIN_SIZE: usize = 16;
const MAX_SIZE: usize = 2048;
const NEAR_PLANE: f32 = 0.05;

const BACKGROUND: Rgba<u8> = Rgba([24, 26, 32, 255]);
const AXIS: Rgba<u8> = Rgba([60, 64, 76, 255]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewType {
    Top,
    Front,
    Side,
}

impl ViewType {
    fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "top" => Some(ViewType::Top),
            "front" => Some(ViewType::Front),
            "side" => Some(ViewType::Side),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ViewType::Top => "top",
            ViewType::Front => "front",
            ViewType::Side => "side",
        }
    }

    /// World position to the plane of this view, with +y pointing up the image.
    fn project(self, p: Vec3) -> Vec2 {
        match self {
            ViewType::Top => Vec2::new(p.x, -p.z),
            ViewType::Front => Vec2::new(p.x, p.y),
            ViewType::Side => Vec2::new(p.z, p.y),
        }
    }
}

fn image_size(params: &Params) -> (u32, u32) {
    let clamp = |v: usize| v.clamp(MIN_SIZE, MAX_SIZE) as u32;
    (
        clamp(params.usize_or("width", DEFAULT_SIZE)),
        clamp(params.usize_or("height", DEFAULT_SIZE)),
    )
}

#[derive(Debug, Clone)]
pub struct FrameRequest {
    pub view: ViewType,
    pub width: u32,
    pub height: u32,
}

impl FrameRequest {
    pub fn from_params(params: &Params) -> BridgeResult<Self> {
        let raw = params.str_or("view_type", "top");
        let view = ViewType::parse(&raw)
            .ok_or_else(|| BridgeError::param("view_type", format!("'{raw}' is not one of top, front, side")))?;
        let (width, height) = image_size(params);
        Ok(Self { view, width, height })
    }
}

#[derive(Debug, Clone)]
pub struct PoseRequest {
    pub position: Vec3,
    pub target: Vec3,
    pub fov_degrees: f32,
    pub width: u32,
    pub height: u32,
}

impl PoseRequest {
    pub fn from_params(params: &Params) -> BridgeResult<Self> {
        let position = Vec3::from_array(params.vec3_or("position", [0.0, 10.0, -10.0]));
        let target = Vec3::from_array(params.vec3_or("target", [0.0, 0.0, 0.0]));
        if position.distance_squared(target) < 1e-6 {
            return Err(BridgeError::param("target", "must differ from position"));
        }
        let fov_degrees = params.f64_or("fov", 60.0).clamp(10.0, 150.0) as f32;
        let (width, height) = image_size(params);
        Ok(Self {
            position,
            target,
            fov_degrees,
            width,
            height,
        })
    }
}

/// Stable colour per tag so repeated captures are comparable.
fn tag_color(tag: &str) -> Rgba<u8> {
    let hash = tag
        .bytes()
        .fold(0x811c_9dc5u32, |h, b| (h ^ b as u32).wrapping_mul(0x0100_0193));
    let hue = (hash % 360) as f32;
    let c = Color::hsl(hue, 0.7, 0.6).to_srgba();
    Rgba([
        (c.red * 255.0) as u8,
        (c.green * 255.0) as u8,
        (c.blue * 255.0) as u8,
        255,
    ])
}

fn dim(color: Rgba<u8>) -> Rgba<u8> {
    let [r, g, b, a] = color.0;
    Rgba([r / 3, g / 3, b / 3, a])
}

fn dot(img: &mut RgbaImage, center: Vec2, radius: i32, color: Rgba<u8>) {
    let (w, h) = (img.width() as i32, img.height() as i32);
    let (cx, cy) = (center.x.round() as i32, center.y.round() as i32);
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy > radius * radius {
                continue;
            }
            let (x, y) = (cx + dx, cy + dy);
            if x >= 0 && y >= 0 && x < w && y < h {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

fn node_color(node: &NodeSnapshot) -> Rgba<u8> {
    let color = tag_color(&node.tag);
    if node.active {
        color
    } else {
        dim(color)
    }
}

fn encode_png(img: &RgbaImage) -> Result<String, String> {
    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(img.as_raw(), img.width(), img.height(), ColorType::Rgba8)
        .map_err(|e| format!("PNG encode failed: {e}"))?;
    Ok(STANDARD.encode(png))
}

/// Orthographic view fitted to the bounds of every node.
pub fn render_frame(nodes: &[NodeSnapshot], request: &FrameRequest) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(request.width, request.height, BACKGROUND);
    let size = Vec2::new(request.width as f32, request.height as f32);
    let projected: Vec<Vec2> = nodes.iter().map(|n| request.view.project(n.position)).collect();

    let (mut min, mut max) = (Vec2::splat(-1.0), Vec2::splat(1.0));
    for p in &projected {
        min = min.min(*p);
        max = max.max(*p);
    }
    let extent = (max - min).max(Vec2::splat(1e-3));
    let margin = 0.1 * size;
    let scale = ((size - 2.0 * margin) / extent).min_element();
    let offset = (size - extent * scale) * 0.5;
    let to_pixel = |p: Vec2| {
        let local = (p - min) * scale + offset;
        Vec2::new(local.x, size.y - local.y)
    };

    let origin = to_pixel(Vec2::ZERO);
    for x in 0..request.width {
        img.put_pixel(x, (origin.y.round() as u32).min(request.height - 1), AXIS);
    }
    for y in 0..request.height {
        img.put_pixel((origin.x.round() as u32).min(request.width - 1), y, AXIS);
    }

    let radius = (request.width.min(request.height) / 96).max(2) as i32;
    for (node, p) in nodes.iter().zip(&projected) {
        dot(&mut img, to_pixel(*p), radius, node_color(node));
    }
    img
}

/// Perspective view from a camera pose. Nodes behind the camera are
/// skipped; nearer nodes are drawn last and larger.
pub fn render_pose(nodes: &[NodeSnapshot], request: &PoseRequest) -> (RgbaImage, usize) {
    let mut img = RgbaImage::from_pixel(request.width, request.height, BACKGROUND);
    let forward = (request.target - request.position).normalize();
    let world_up = if forward.cross(Vec3::Y).length_squared() < 1e-6 {
        Vec3::Z
    } else {
        Vec3::Y
    };
    let right = forward.cross(world_up).normalize();
    let up = right.cross(forward);
    let aspect = request.width as f32 / request.height as f32;
    let half = (request.fov_degrees.to_radians() * 0.5).tan();
    let size = Vec2::new(request.width as f32, request.height as f32);

    let mut visible: Vec<(f32, Vec2, Rgba<u8>)> = nodes
        .iter()
        .filter_map(|node| {
            let d = node.position - request.position;
            let depth = d.dot(forward);
            if depth <= NEAR_PLANE {
                return None;
            }
            let ndc = Vec2::new(
                d.dot(right) / (depth * half * aspect),
                d.dot(up) / (depth * half),
            );
            let pixel = Vec2::new((ndc.x + 1.0) * 0.5 * size.x, (1.0 - ndc.y) * 0.5 * size.y);
            Some((depth, pixel, node_color(node)))
        })
        .collect();
    visible.sort_by(|a, b| b.0.total_cmp(&a.0));

    let base = request.width.min(request.height) as f32 / 24.0;
    for (depth, pixel, color) in &visible {
        let radius = (base / depth.max(1.0)).clamp(1.0, base) as i32;
        dot(&mut img, *pixel, radius, *color);
    }
    let drawn = visible
        .iter()
        .filter(|(_, p, _)| p.x >= 0.0 && p.y >= 0.0 && p.x < size.x && p.y < size.y)
        .count();
    (img, drawn)
}

pub fn capture_frame(world: &mut World, request: &FrameRequest) -> OperationResult {
    let (snapshot, _) = snapshot_world(world);
    let img = render_frame(&snapshot.nodes, request);
    match encode_png(&img) {
        Ok(png) => OperationResult::image(
            format!(
                "{} view {}x{}, {} nodes",
                request.view.label(),
                request.width,
                request.height,
                snapshot.nodes.len()
            ),
            png,
        ),
        Err(e) => OperationResult::fail(e),
    }
}

pub fn capture_from_pose(world: &mut World, request: &PoseRequest) -> OperationResult {
    let (snapshot, _) = snapshot_world(world);
    let (img, drawn) = render_pose(&snapshot.nodes, request);
    match encode_png(&img) {
        Ok(png) => OperationResult::image(
            format!(
                "pose view from {:?} to {:?} fov {:.0}, {}x{}, {drawn} of {} nodes in frame",
                request.position.to_array(),
                request.target.to_array(),
                request.fov_degrees,
                request.width,
                request.height,
                snapshot.nodes.len()
            ),
            png,
        ),
        Err(e) => OperationResult::fail(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::IMAGE_KEY;
    use crate::components::NodeTag;
    use serde_json::{json, Value};

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => Params::new(map),
            _ => Params::default(),
        }
    }

    fn node(x: f32, y: f32, z: f32, tag: &str) -> NodeSnapshot {
        NodeSnapshot {
            id: 0,
            name: "n".into(),
            path: "n".into(),
            tag: tag.into(),
            layer: 0,
            active: true,
            parent: None,
            children: Vec::new(),
            position: Vec3::new(x, y, z),
        }
    }

    #[test]
    fn requests_validate_parameters() {
        assert!(FrameRequest::from_params(&params(json!({"view_type": "iso"}))).is_err());
        let frame = FrameRequest::from_params(&params(json!({"view_type": "FRONT", "width": 4}))).unwrap();
        assert_eq!((frame.view, frame.width, frame.height), (ViewType::Front, 16, 256));
        let pose = params(json!({"position": [1, 1, 1], "target": [1, 1, 1]}));
        assert!(PoseRequest::from_params(&pose).is_err());
    }

    #[test]
    fn pose_skips_nodes_behind_camera() {
        let request = PoseRequest {
            position: Vec3::new(0.0, 0.0, -10.0),
            target: Vec3::ZERO,
            fov_degrees: 60.0,
            width: 64,
            height: 64,
        };
        let nodes = [node(0.0, 0.0, 0.0, "Enemy"), node(0.0, 0.0, -20.0, "Enemy")];
        let (img, drawn) = render_pose(&nodes, &request);
        assert_eq!(drawn, 1);
        assert_ne!(*img.get_pixel(32, 32), BACKGROUND);
    }

    #[test]
    fn frame_capture_yields_png_image() {
        let mut world = World::new();
        world.spawn((Name::new("A"), NodeTag("Enemy".into()), Transform::from_xyz(3.0, 0.0, 2.0)));
        let request = FrameRequest {
            view: ViewType::Top,
            width: 32,
            height: 32,
        };
        let OperationResult::Ok { message, data } = capture_frame(&mut world, &request) else {
            panic!("capture failed");
        };
        assert!(message.starts_with("top view 32x32, 1 nodes"));
        let png = STANDARD.decode(data[IMAGE_KEY].as_str().unwrap()).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }
}
