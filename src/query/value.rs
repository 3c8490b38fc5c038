//! Values produced by resolving a path expression against a node, and
//! their bounded textual rendering.

use std::cmp::Ordering;
use std::fmt::Write as _;

pub const MAX_STRING_CHARS: usize = 200;
pub const MAX_COLLECTION_ITEMS: usize = 20;
pub const ELLIPSIS: &str = "...";

/// Identity of a node referenced from a property. Rendered as
/// `Type('name', path='a/b/c')` and never expanded.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeStub {
    pub type_name: String,
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Quat([f32; 4]),
    Color([f32; 4]),
    Rect { min: [f32; 2], max: [f32; 2] },
    Bounds { min: [f32; 3], max: [f32; 3] },
    /// Items kept after truncation plus the original length.
    List { items: Vec<PropValue>, total: usize },
    Node(NodeStub),
    /// Shallow view of a reflected struct; nested structs are rendered by
    /// type name only.
    Object {
        type_name: String,
        fields: Vec<(String, PropValue)>,
    },
    /// Anything without a structured rendering (opaque reflected values).
    Opaque(String),
}

impl PropValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PropValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropValue::Int(v) => Some(*v as f64),
            PropValue::Float(v) => Some(*v),
            PropValue::Str(s) => numeric(s),
            _ => None,
        }
    }

    /// Plain text used for comparisons and string functions. Unlike
    /// [`PropValue::render`] it does not quote strings.
    pub fn to_plain(&self) -> String {
        match self {
            PropValue::Str(s) => s.clone(),
            PropValue::Node(stub) => stub.name.clone(),
            other => other.render(),
        }
    }

    /// Bounded display form used in query reports.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) {
        match self {
            PropValue::Null => out.push_str("null"),
            PropValue::Bool(b) => {
                let _ = write!(out, "{b}");
            }
            PropValue::Int(v) => {
                let _ = write!(out, "{v}");
            }
            PropValue::Float(v) => {
                let _ = write!(out, "{}", format_float(*v));
            }
            PropValue::Str(s) => out.push_str(&truncate_str(s)),
            PropValue::Vec2(v) => {
                let _ = write!(out, "({:.3}, {:.3})", v[0], v[1]);
            }
            PropValue::Vec3(v) => {
                let _ = write!(out, "({:.3}, {:.3}, {:.3})", v[0], v[1], v[2]);
            }
            PropValue::Vec4(v) => {
                let _ = write!(out, "({:.3}, {:.3}, {:.3}, {:.3})", v[0], v[1], v[2], v[3]);
            }
            PropValue::Quat(q) => {
                let _ = write!(
                    out,
                    "Quat({:.4}, {:.4}, {:.4}, {:.4})",
                    q[0], q[1], q[2], q[3]
                );
            }
            PropValue::Color(c) => {
                let _ = write!(out, "RGBA({:.3}, {:.3}, {:.3}, {:.3})", c[0], c[1], c[2], c[3]);
            }
            PropValue::Rect { min, max } => {
                let _ = write!(
                    out,
                    "Rect(min=({:.3}, {:.3}), size=({:.3}, {:.3}))",
                    min[0],
                    min[1],
                    max[0] - min[0],
                    max[1] - min[1]
                );
            }
            PropValue::Bounds { min, max } => {
                let center = [
                    (min[0] + max[0]) * 0.5,
                    (min[1] + max[1]) * 0.5,
                    (min[2] + max[2]) * 0.5,
                ];
                let size = [max[0] - min[0], max[1] - min[1], max[2] - min[2]];
                let _ = write!(
                    out,
                    "Bounds(center=({:.3}, {:.3}, {:.3}), size=({:.3}, {:.3}, {:.3}))",
                    center[0], center[1], center[2], size[0], size[1], size[2]
                );
            }
            PropValue::List { items, total } => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.render_into(out);
                }
                if *total > items.len() {
                    if !items.is_empty() {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{ELLIPSIS} (+{} more)", total - items.len());
                }
                out.push(']');
            }
            PropValue::Node(stub) => {
                let _ = write!(out, "{}('{}', path='{}')", stub.type_name, stub.name, stub.path);
            }
            PropValue::Object { type_name, fields } => {
                out.push_str(type_name);
                out.push_str(" { ");
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(name);
                    out.push_str(": ");
                    value.render_into(out);
                }
                out.push_str(" }");
            }
            PropValue::Opaque(text) => out.push_str(&truncate_str(text)),
        }
    }
}

pub fn format_float(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.1}")
    } else {
        format!("{v:.3}")
    }
}

pub fn truncate_str(s: &str) -> String {
    if s.chars().count() <= MAX_STRING_CHARS {
        return s.to_string();
    }
    let mut out: String = s.chars().take(MAX_STRING_CHARS).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Caps a collection at [`MAX_COLLECTION_ITEMS`], remembering its length.
pub fn bounded_list(items: impl IntoIterator<Item = PropValue>, total: usize) -> PropValue {
    PropValue::List {
        items: items.into_iter().take(MAX_COLLECTION_ITEMS).collect(),
        total,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "==" | "=" => CompareOp::Eq,
            "!=" | "<>" => CompareOp::Ne,
            ">" => CompareOp::Gt,
            ">=" => CompareOp::Ge,
            "<" => CompareOp::Lt,
            "<=" => CompareOp::Le,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
        }
    }
}

/// Text that reads as a number. Requires a digit, so names like `NaN`
/// or `inf` stay text.
fn numeric(text: &str) -> Option<f64> {
    let text = text.trim();
    if !text.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse::<f64>().ok()
}

/// Numeric comparison when both sides parse as numbers, otherwise a
/// case-insensitive ordinal comparison of the text.
pub fn compare_text(left: &str, op: CompareOp, right: &str) -> bool {
    let (l, r) = (left.trim(), right.trim());
    if let (Some(a), Some(b)) = (numeric(l), numeric(r)) {
        return match a.partial_cmp(&b) {
            Some(ordering) => op.accepts(ordering),
            None => op == CompareOp::Ne,
        };
    }
    op.accepts(l.to_lowercase().cmp(&r.to_lowercase()))
}

pub fn compare_values(left: &PropValue, op: CompareOp, right: &PropValue) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => match a.partial_cmp(&b) {
            Some(ordering) => op.accepts(ordering),
            None => op == CompareOp::Ne,
        },
        _ => compare_text(&left.to_plain(), op, &right.to_plain()),
    }
}
