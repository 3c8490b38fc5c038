//! Resolution of dotted path expressions (`Health.current`,
//! `Inventory.items[0].name`, `tag`) against a live node.
//!
//! Each segment is looked up case-insensitively, computed properties
//! first and reflected fields second. Anything that cannot be resolved
//! yields [`PropValue::Null`].

use bevy::math::bounding::Aabb3d;
use bevy::math::Vec3A;
use bevy::prelude::*;
use bevy::reflect::{DynamicTypePath, PartialReflect, ReflectRef};

use super::value::{bounded_list, NodeStub, PropValue};
use super::view::SceneView;

const BUILTINS: &[&str] = &["name", "path", "id", "active", "tag", "layer"];

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub name: String,
    pub indices: Vec<usize>,
}

/// Parsed path expression. `text` keeps the original spelling for labels.
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    pub text: String,
    pub segments: Vec<Segment>,
}

impl PathExpr {
    pub fn parse(text: &str) -> Result<Self, String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err("empty path expression".into());
        }
        let mut segments = Vec::new();
        for raw in trimmed.split('.') {
            let raw = raw.trim();
            let (name, mut rest) = match raw.find('[') {
                Some(open) => (&raw[..open], &raw[open..]),
                None => (raw, ""),
            };
            if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(format!("invalid segment '{raw}' in '{trimmed}'"));
            }
            let mut indices = Vec::new();
            while !rest.is_empty() {
                let close = rest
                    .find(']')
                    .ok_or_else(|| format!("unclosed '[' in '{trimmed}'"))?;
                let index = rest[1..close]
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| format!("index must be a non-negative integer in '{trimmed}'"))?;
                indices.push(index);
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(format!("unexpected '{rest}' after index in '{trimmed}'"));
                }
            }
            segments.push(Segment {
                name: name.to_string(),
                indices,
            });
        }
        Ok(Self {
            text: trimmed.to_string(),
            segments,
        })
    }
}

/// Either a borrowed reflected value or an already materialised one.
enum Cursor<'a> {
    Reflected(&'a dyn PartialReflect),
    Value(PropValue),
}

pub fn resolve(view: &SceneView<'_>, node: Entity, expr: &PathExpr) -> PropValue {
    if !view.exists(node) {
        return PropValue::Null;
    }
    let Some((head, tail)) = expr.segments.split_first() else {
        return PropValue::Null;
    };

    if tail.is_empty() && head.indices.is_empty() {
        if let Some(value) = builtin(view, node, &head.name) {
            return value;
        }
    }

    let cursor = if head.name.eq_ignore_ascii_case("GameObject") {
        let Some(first) = tail.first() else {
            return node_stub(view, node);
        };
        let Some(value) = game_object_member(view, node, &first.name) else {
            return PropValue::Null;
        };
        return walk(view, Cursor::Value(value), &first.indices, &tail[1..]);
    } else {
        match view.reflect_component(node, &head.name) {
            Some(component) => Cursor::Reflected(component.as_partial_reflect()),
            None => return PropValue::Null,
        }
    };

    walk(view, cursor, &head.indices, tail)
}

fn walk(view: &SceneView<'_>, cursor: Cursor<'_>, indices: &[usize], rest: &[Segment]) -> PropValue {
    let mut cursor = cursor;
    for &index in indices {
        match index_into(cursor, index) {
            Some(next) => cursor = next,
            None => return PropValue::Null,
        }
    }
    for segment in rest {
        match member(cursor, &segment.name) {
            Some(next) => cursor = next,
            None => return PropValue::Null,
        }
        for &index in &segment.indices {
            match index_into(cursor, index) {
                Some(next) => cursor = next,
                None => return PropValue::Null,
            }
        }
    }
    match cursor {
        Cursor::Reflected(value) => to_prop(view, value, 0),
        Cursor::Value(value) => value,
    }
}

fn builtin(view: &SceneView<'_>, node: Entity, name: &str) -> Option<PropValue> {
    let lower = name.to_ascii_lowercase();
    if !BUILTINS.contains(&lower.as_str()) {
        return None;
    }
    game_object_member(view, node, &lower)
}

fn game_object_member(view: &SceneView<'_>, node: Entity, member: &str) -> Option<PropValue> {
    Some(match member.to_ascii_lowercase().as_str() {
        "name" => PropValue::Str(view.name(node)),
        "path" => PropValue::Str(view.path(node)),
        "id" => PropValue::Int(view.id(node) as i64),
        "active" => PropValue::Bool(view.active(node)),
        "tag" => PropValue::Str(view.tag(node)),
        "layer" => PropValue::Int(view.layer(node) as i64),
        "childcount" => PropValue::Int(view.children(node).len() as i64),
        "parent" => match view.parent(node) {
            Some(parent) => node_stub(view, parent),
            None => PropValue::Null,
        },
        "components" => {
            let names: Vec<PropValue> = view
                .component_names(node)
                .iter()
                .map(|n| PropValue::Str(super::view::simple_type_name(n).to_string()))
                .collect();
            let total = names.len();
            bounded_list(names, total)
        }
        _ => return None,
    })
}

fn node_stub(view: &SceneView<'_>, node: Entity) -> PropValue {
    if !view.exists(node) {
        return PropValue::Null;
    }
    PropValue::Node(NodeStub {
        type_name: "Entity".to_string(),
        name: view.name(node),
        path: view.path(node),
    })
}

fn member<'a>(cursor: Cursor<'a>, name: &str) -> Option<Cursor<'a>> {
    match cursor {
        Cursor::Reflected(value) => {
            if let Some(computed) = computed_property(value, name) {
                return Some(computed);
            }
            reflected_field(value, name).map(Cursor::Reflected)
        }
        Cursor::Value(value) => value_member(&value, name).map(Cursor::Value),
    }
}

/// Properties derived from a value rather than stored in it. Checked
/// before fields.
fn computed_property<'a>(value: &'a dyn PartialReflect, name: &str) -> Option<Cursor<'a>> {
    let lower = name.to_ascii_lowercase();
    if let Some(transform) = value.try_downcast_ref::<Transform>() {
        return match lower.as_str() {
            "position" => Some(Cursor::Reflected(&transform.translation)),
            "forward" => Some(Cursor::Value(vec3(*transform.forward()))),
            "right" => Some(Cursor::Value(vec3(*transform.right()))),
            "up" => Some(Cursor::Value(vec3(*transform.up()))),
            "euler" | "eulerangles" => {
                let (y, x, z) = transform.rotation.to_euler(EulerRot::YXZ);
                Some(Cursor::Value(PropValue::Vec3([
                    x.to_degrees(),
                    y.to_degrees(),
                    z.to_degrees(),
                ])))
            }
            _ => None,
        };
    }
    if let Some(v) = value.try_downcast_ref::<Vec3>() {
        return vector_property(&lower, v.length(), || vec3(v.normalize_or_zero()));
    }
    if let Some(v) = value.try_downcast_ref::<Vec2>() {
        return vector_property(&lower, v.length(), || {
            let n = v.normalize_or_zero();
            PropValue::Vec2([n.x, n.y])
        });
    }
    None
}

fn vector_property<'a>(
    name: &str,
    length: f32,
    normalized: impl FnOnce() -> PropValue,
) -> Option<Cursor<'a>> {
    match name {
        "magnitude" | "length" => Some(Cursor::Value(PropValue::Float(length as f64))),
        "normalized" => Some(Cursor::Value(normalized())),
        _ => None,
    }
}

fn vec3(v: Vec3) -> PropValue {
    PropValue::Vec3([v.x, v.y, v.z])
}

fn reflected_field<'a>(value: &'a dyn PartialReflect, name: &str) -> Option<&'a dyn PartialReflect> {
    match value.reflect_ref() {
        ReflectRef::Struct(s) => (0..s.field_len()).find_map(|i| {
            let field_name = s.name_at(i)?;
            if field_name.eq_ignore_ascii_case(name) {
                s.field_at(i)
            } else {
                None
            }
        }),
        ReflectRef::TupleStruct(ts) => match name.parse::<usize>() {
            Ok(i) => ts.field(i),
            // newtypes forward member access to their single field
            Err(_) if ts.field_len() == 1 => ts.field(0).and_then(|inner| reflected_field(inner, name)),
            Err(_) => None,
        },
        ReflectRef::Tuple(t) => name.parse::<usize>().ok().and_then(|i| t.field(i)),
        ReflectRef::Enum(e) => (0..e.field_len()).find_map(|i| {
            let field_name = e.name_at(i)?;
            if field_name.eq_ignore_ascii_case(name) {
                e.field_at(i)
            } else {
                None
            }
        }),
        _ => None,
    }
}

fn value_member(value: &PropValue, name: &str) -> Option<PropValue> {
    let lower = name.to_ascii_lowercase();
    let axis = |v: &[f32]| -> Option<PropValue> {
        let i = match lower.as_str() {
            "x" | "r" => 0,
            "y" | "g" => 1,
            "z" | "b" => 2,
            "w" | "a" => 3,
            _ => return None,
        };
        v.get(i).map(|c| PropValue::Float(*c as f64))
    };
    match value {
        PropValue::Vec2(v) => axis(&v[..]),
        PropValue::Vec3(v) => match lower.as_str() {
            "magnitude" | "length" => {
                Some(PropValue::Float(Vec3::from_array(*v).length() as f64))
            }
            _ => axis(&v[..]),
        },
        PropValue::Vec4(v) | PropValue::Quat(v) | PropValue::Color(v) => axis(&v[..]),
        PropValue::Node(stub) => match lower.as_str() {
            "name" => Some(PropValue::Str(stub.name.clone())),
            "path" => Some(PropValue::Str(stub.path.clone())),
            _ => None,
        },
        PropValue::Object { fields, .. } => fields
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone()),
        PropValue::List { total, .. } if lower == "count" || lower == "len" || lower == "length" => {
            Some(PropValue::Int(*total as i64))
        }
        PropValue::Str(s) if lower == "length" || lower == "len" => {
            Some(PropValue::Int(s.chars().count() as i64))
        }
        _ => None,
    }
}

fn index_into(cursor: Cursor<'_>, index: usize) -> Option<Cursor<'_>> {
    match cursor {
        Cursor::Reflected(value) => match value.reflect_ref() {
            ReflectRef::List(list) => list.get(index).map(Cursor::Reflected),
            ReflectRef::Array(array) => array.get(index).map(Cursor::Reflected),
            ReflectRef::Tuple(t) => t.field(index).map(Cursor::Reflected),
            ReflectRef::TupleStruct(ts) if ts.field_len() == 1 => {
                ts.field(0).and_then(|inner| index_into(Cursor::Reflected(inner), index))
            }
            _ => None,
        },
        Cursor::Value(PropValue::List { items, .. }) => items.get(index).cloned().map(Cursor::Value),
        Cursor::Value(PropValue::Str(s)) => s
            .chars()
            .nth(index)
            .map(|c| Cursor::Value(PropValue::Str(c.to_string()))),
        Cursor::Value(_) => None,
    }
}

/// Materialises a reflected value. Structs are expanded one level deep;
/// entity references become identity stubs and are never followed.
pub(crate) fn to_prop(view: &SceneView<'_>, value: &dyn PartialReflect, depth: usize) -> PropValue {
    macro_rules! downcast {
        ($($ty:ty => $conv:expr),+ $(,)?) => {
            $(
                if let Some(v) = value.try_downcast_ref::<$ty>() {
                    let f: fn(&$ty) -> PropValue = $conv;
                    return f(v);
                }
            )+
        };
    }
    downcast!(
        bool => |v| PropValue::Bool(*v),
        i8 => |v| PropValue::Int(*v as i64),
        i16 => |v| PropValue::Int(*v as i64),
        i32 => |v| PropValue::Int(*v as i64),
        i64 => |v| PropValue::Int(*v),
        isize => |v| PropValue::Int(*v as i64),
        u8 => |v| PropValue::Int(*v as i64),
        u16 => |v| PropValue::Int(*v as i64),
        u32 => |v| PropValue::Int(*v as i64),
        u64 => |v| PropValue::Int(*v as i64),
        usize => |v| PropValue::Int(*v as i64),
        f32 => |v| PropValue::Float(*v as f64),
        f64 => |v| PropValue::Float(*v),
        String => |v| PropValue::Str(v.clone()),
        Name => |v| PropValue::Str(v.as_str().to_string()),
        Vec2 => |v| PropValue::Vec2([v.x, v.y]),
        Vec3 => |v| vec3(*v),
        Vec3A => |v| PropValue::Vec3([v.x, v.y, v.z]),
        Vec4 => |v| PropValue::Vec4([v.x, v.y, v.z, v.w]),
        Quat => |v| PropValue::Quat([v.x, v.y, v.z, v.w]),
        Color => |v| {
            let c = v.to_srgba();
            PropValue::Color([c.red, c.green, c.blue, c.alpha])
        },
        Rect => |v| PropValue::Rect {
            min: [v.min.x, v.min.y],
            max: [v.max.x, v.max.y],
        },
        Aabb3d => |v| PropValue::Bounds {
            min: [v.min.x, v.min.y, v.min.z],
            max: [v.max.x, v.max.y, v.max.z],
        },
    );
    if let Some(entity) = value.try_downcast_ref::<Entity>() {
        return node_stub(view, *entity);
    }

    match value.reflect_ref() {
        ReflectRef::List(list) => {
            let total = list.len();
            bounded_list(list.iter().map(|item| to_prop(view, item, depth + 1)), total)
        }
        ReflectRef::Array(array) => {
            let total = array.len();
            bounded_list(array.iter().map(|item| to_prop(view, item, depth + 1)), total)
        }
        ReflectRef::Struct(s) => {
            let type_name = value.reflect_short_type_path().to_string();
            if depth >= 2 {
                return PropValue::Opaque(format!("{type_name} {{..}}"));
            }
            let fields = (0..s.field_len())
                .filter_map(|i| {
                    let name = s.name_at(i)?.to_string();
                    let field = s.field_at(i)?;
                    Some((name, to_prop(view, field, depth + 1)))
                })
                .collect();
            PropValue::Object { type_name, fields }
        }
        ReflectRef::TupleStruct(ts) if ts.field_len() == 1 => match ts.field(0) {
            Some(inner) => to_prop(view, inner, depth),
            None => PropValue::Null,
        },
        ReflectRef::Enum(e) => {
            if e.field_len() == 0 {
                PropValue::Str(e.variant_name().to_string())
            } else if e.field_len() == 1 && e.name_at(0).is_none() {
                match e.field_at(0) {
                    Some(inner) => to_prop(view, inner, depth),
                    None => PropValue::Str(e.variant_name().to_string()),
                }
            } else {
                PropValue::Opaque(format!("{}::{}", value.reflect_short_type_path(), e.variant_name()))
            }
        }
        _ => PropValue::Opaque(format!("{value:?}")),
    }
}
