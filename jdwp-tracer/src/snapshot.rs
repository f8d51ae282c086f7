// Variable snapshot and diff engine
//
// At every pause inside the traced class, reads all locals visible in the
// topmost frame, renders each value to text, and tags it against what was
// last seen for the same name at the same program point.

use crate::resolve::Resolver;
use anyhow::{anyhow, Context, Result};
use jdwp_client::stackframe::VariableSlot;
use jdwp_client::types::{primitive_name, tags, ThreadId, Value, ValueData};
use jdwp_client::JdwpConnection;
use std::collections::HashMap;

/// Runtime types whose methods are never invoked inside the target: calling
/// into a reader blocked on stdin from the paused thread can deadlock the
/// whole VM.
const OPAQUE_TYPES: &[&str] = &[
    "java.io.BufferedReader",
    "java.io.Console",
    "java.io.InputStreamReader",
    "java.util.Scanner",
];

pub fn is_opaque(type_name: &str) -> bool {
    type_name.ends_with("InputStream") || OPAQUE_TYPES.contains(&type_name)
}

/// How a value compares to the previous sighting at the same program point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Age {
    New,
    Modified,
    Old,
}

impl Age {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Modified => "modified",
            Self::Old => "old",
        }
    }
}

/// A (source file, line) pair; the namespace for variable history.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramPoint {
    pub file: String,
    pub line: i32,
}

/// Last-seen values per variable name, kept separately per program point
/// for the life of the session.
#[derive(Debug, Default)]
pub struct FrameHistory {
    seen: HashMap<ProgramPoint, HashMap<String, String>>,
}

impl FrameHistory {
    /// Tag a sighting against history, then record it.
    pub fn observe(&mut self, point: &ProgramPoint, name: &str, value: &str) -> Age {
        let values = self.seen.entry(point.clone()).or_default();

        let age = match values.get(name) {
            None => Age::New,
            Some(prev) if prev == value => Age::Old,
            Some(_) => Age::Modified,
        };

        values.insert(name.to_string(), value.to_string());
        age
    }
}

#[derive(Debug)]
pub struct VariableRecord {
    pub name: String,
    pub type_name: String,
    pub age: Age,
    pub proxy: Option<String>,
    pub value: String,
}

#[derive(Debug)]
pub struct PointRecord {
    pub point: ProgramPoint,
    pub variables: Vec<VariableRecord>,
}

struct Rendered {
    type_name: String,
    proxy: Option<String>,
    value: String,
}

/// Snapshot the topmost frame of `thread`. Returns `None` when the frame
/// does not belong to `target_class`. A failure on any variable abandons
/// the whole record so the trace never carries a partial program point.
pub async fn capture(
    conn: &mut JdwpConnection,
    resolver: &mut Resolver,
    history: &mut FrameHistory,
    thread: ThreadId,
    target_class: &str,
) -> Result<Option<PointRecord>> {
    let frames = conn.frames(thread, 0, 1).await?;
    let Some(frame) = frames.into_iter().next() else {
        return Ok(None);
    };
    let loc = frame.location;

    let class_name = resolver.class_name(conn, loc.class_id).await?;
    if class_name != target_class {
        return Ok(None);
    }

    let file = resolver.source_file(conn, loc.class_id).await?;
    let line = resolver
        .line_number(conn, loc.class_id, loc.method_id, loc.index)
        .await?
        .unwrap_or(-1);
    let point = ProgramPoint { file, line };

    let visible = resolver
        .visible_variables(conn, loc.class_id, loc.method_id, loc.index)
        .await?;

    let slots: Vec<VariableSlot> = visible
        .iter()
        .map(|v| VariableSlot {
            slot: v.slot as i32,
            sig_byte: *v.signature.as_bytes().first().unwrap_or(&tags::OBJECT),
        })
        .collect();
    let values = conn.frame_values(thread, frame.frame_id, &slots).await?;

    let mut variables = Vec::with_capacity(values.len());
    for (var, value) in visible.iter().zip(values.iter()) {
        let rendered = render_value(conn, resolver, thread, value)
            .await
            .with_context(|| {
                format!("variable {} at {}:{}", var.name, point.file, point.line)
            })?;

        let age = history.observe(&point, &var.name, &rendered.value);

        variables.push(VariableRecord {
            name: var.name.clone(),
            type_name: rendered.type_name,
            age,
            proxy: rendered.proxy,
            value: rendered.value,
        });
    }

    Ok(Some(PointRecord { point, variables }))
}

async fn render_value(
    conn: &mut JdwpConnection,
    resolver: &mut Resolver,
    thread: ThreadId,
    value: &Value,
) -> Result<Rendered> {
    let object_id = match value.data {
        ValueData::Object(0) => {
            // Null reference: the null marker stands in for the type
            return Ok(Rendered {
                type_name: "null".to_string(),
                proxy: None,
                value: "null".to_string(),
            });
        }
        ValueData::Object(id) => id,
        _ => {
            return Ok(Rendered {
                type_name: primitive_name(value.tag).to_string(),
                proxy: None,
                value: value.literal(),
            });
        }
    };

    let type_id = conn.object_type(object_id).await?;
    let type_name = resolver.class_name(conn, type_id).await?;

    if value.tag == tags::ARRAY {
        // Elements rendered flat; no recursion, no invocation
        let length = conn.array_length(object_id).await?;
        let elements = if length > 0 {
            conn.array_values(object_id, 0, length).await?
        } else {
            Vec::new()
        };
        let list = elements
            .iter()
            .map(|e| e.literal())
            .collect::<Vec<_>>()
            .join(", ");

        return Ok(Rendered {
            type_name,
            proxy: None,
            value: format!("[{}]", list),
        });
    }

    if is_opaque(&type_name) {
        return Ok(Rendered {
            value: type_name.clone(),
            proxy: None,
            type_name,
        });
    }

    let target = resolver
        .to_string_method(conn, type_id)
        .await?
        .ok_or_else(|| anyhow!("no toString() anywhere on {}", type_name))?;

    let result = conn
        .invoke_method(object_id, thread, target.class_id, target.method_id)
        .await?;

    let text = match result.data {
        ValueData::Object(0) => "null".to_string(),
        ValueData::Object(string_id) if result.tag == tags::STRING => {
            conn.string_value(string_id).await?
        }
        _ => result.literal(),
    };

    Ok(Rendered {
        type_name,
        proxy: Some(target.proxy),
        value: text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(file: &str, line: i32) -> ProgramPoint {
        ProgramPoint {
            file: file.to_string(),
            line,
        }
    }

    #[test]
    fn test_age_new_then_modified_then_old() {
        let mut history = FrameHistory::default();
        let p = point("Main.java", 10);

        assert_eq!(history.observe(&p, "i", "0"), Age::New);
        assert_eq!(history.observe(&p, "i", "1"), Age::Modified);
        assert_eq!(history.observe(&p, "i", "1"), Age::Old);
    }

    #[test]
    fn test_history_is_per_program_point() {
        let mut history = FrameHistory::default();
        let p10 = point("Main.java", 10);
        let p11 = point("Main.java", 11);

        assert_eq!(history.observe(&p10, "i", "0"), Age::New);
        // Same name and value, different point: still a first sighting
        assert_eq!(history.observe(&p11, "i", "0"), Age::New);
        assert_eq!(history.observe(&p10, "i", "0"), Age::Old);
    }

    #[test]
    fn test_history_distinguishes_files() {
        let mut history = FrameHistory::default();
        assert_eq!(history.observe(&point("A.java", 5), "x", "1"), Age::New);
        assert_eq!(history.observe(&point("B.java", 5), "x", "1"), Age::New);
    }

    #[test]
    fn test_opaque_types() {
        assert!(is_opaque("java.io.BufferedInputStream"));
        assert!(is_opaque("java.io.FileInputStream"));
        assert!(is_opaque("java.io.BufferedReader"));
        assert!(is_opaque("java.util.Scanner"));
        assert!(!is_opaque("java.lang.String"));
        assert!(!is_opaque("java.util.ArrayList"));
    }

    #[test]
    fn test_age_strings() {
        assert_eq!(Age::New.as_str(), "new");
        assert_eq!(Age::Modified.as_str(), "modified");
        assert_eq!(Age::Old.as_str(), "old");
    }
}
