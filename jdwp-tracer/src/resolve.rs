// Cached introspection lookups against the target VM
//
// Class names, source files, and per-method debug tables are immutable for
// the life of a class, so every lookup is memoized. The caches live on the
// control thread only.

use jdwp_client::method::LineTable;
use jdwp_client::types::{ClassId, MethodId, ReferenceTypeId, Variable};
use jdwp_client::{JdwpConnection, JdwpResult};
use std::collections::HashMap;

/// A resolved `toString()` ready to invoke: the declaring class, the method
/// ID, and the human-readable descriptor recorded in the trace.
#[derive(Debug, Clone)]
pub struct ToStringMethod {
    pub class_id: ClassId,
    pub method_id: MethodId,
    pub proxy: String,
}

#[derive(Default)]
pub struct Resolver {
    class_names: HashMap<ReferenceTypeId, String>,
    source_files: HashMap<ReferenceTypeId, String>,
    line_tables: HashMap<(ReferenceTypeId, MethodId), LineTable>,
    variable_tables: HashMap<(ReferenceTypeId, MethodId), Vec<Variable>>,
    to_string_methods: HashMap<ReferenceTypeId, Option<ToStringMethod>>,
}

impl Resolver {
    /// Readable name of a type, e.g. "java.lang.String" or "int[]".
    pub async fn class_name(
        &mut self,
        conn: &mut JdwpConnection,
        ref_type: ReferenceTypeId,
    ) -> JdwpResult<String> {
        if let Some(name) = self.class_names.get(&ref_type) {
            return Ok(name.clone());
        }

        let signature = conn.type_signature(ref_type).await?;
        let name = pretty_type_name(&signature);
        self.class_names.insert(ref_type, name.clone());
        Ok(name)
    }

    pub async fn source_file(
        &mut self,
        conn: &mut JdwpConnection,
        ref_type: ReferenceTypeId,
    ) -> JdwpResult<String> {
        if let Some(file) = self.source_files.get(&ref_type) {
            return Ok(file.clone());
        }

        let file = conn.source_file(ref_type).await?;
        self.source_files.insert(ref_type, file.clone());
        Ok(file)
    }

    pub async fn line_table(
        &mut self,
        conn: &mut JdwpConnection,
        ref_type: ReferenceTypeId,
        method: MethodId,
    ) -> JdwpResult<LineTable> {
        let key = (ref_type, method);
        if let Some(table) = self.line_tables.get(&key) {
            return Ok(table.clone());
        }

        let table = conn.line_table(ref_type, method).await?;
        self.line_tables.insert(key, table.clone());
        Ok(table)
    }

    /// The source line covering a bytecode index within a method.
    pub async fn line_number(
        &mut self,
        conn: &mut JdwpConnection,
        ref_type: ReferenceTypeId,
        method: MethodId,
        pc: u64,
    ) -> JdwpResult<Option<i32>> {
        let table = self.line_table(conn, ref_type, method).await?;
        Ok(table.line_at(pc))
    }

    /// Locals visible at the given bytecode index, in slot order.
    pub async fn visible_variables(
        &mut self,
        conn: &mut JdwpConnection,
        ref_type: ReferenceTypeId,
        method: MethodId,
        pc: u64,
    ) -> JdwpResult<Vec<Variable>> {
        let key = (ref_type, method);
        if !self.variable_tables.contains_key(&key) {
            let table = conn.variable_table(ref_type, method).await?;
            self.variable_tables.insert(key, table);
        }

        let table = &self.variable_tables[&key];
        let mut visible: Vec<Variable> = table
            .iter()
            .filter(|v| v.in_scope_at(pc))
            .cloned()
            .collect();
        visible.sort_by_key(|v| v.slot);
        Ok(visible)
    }

    /// Find `toString()` on a class or the nearest superclass declaring it.
    /// `None` when the hierarchy declares no such method.
    pub async fn to_string_method(
        &mut self,
        conn: &mut JdwpConnection,
        ref_type: ReferenceTypeId,
    ) -> JdwpResult<Option<ToStringMethod>> {
        if let Some(cached) = self.to_string_methods.get(&ref_type) {
            return Ok(cached.clone());
        }

        let mut current = ref_type;
        let mut found = None;
        while current != 0 {
            let methods = conn.methods(current).await?;
            if let Some(m) = methods
                .iter()
                .find(|m| m.name == "toString" && m.signature == "()Ljava/lang/String;")
            {
                let owner = self.class_name(conn, current).await?;
                found = Some(ToStringMethod {
                    class_id: current,
                    method_id: m.method_id,
                    proxy: format!("{}.toString()", owner),
                });
                break;
            }
            current = conn.superclass(current).await?;
        }

        self.to_string_methods.insert(ref_type, found.clone());
        Ok(found)
    }
}

/// Decode a JNI type signature into a source-level name.
pub fn pretty_type_name(signature: &str) -> String {
    let mut dims = 0;
    let mut sig = signature;
    while let Some(rest) = sig.strip_prefix('[') {
        dims += 1;
        sig = rest;
    }

    let base = match sig.as_bytes().first() {
        Some(b'L') => sig[1..].trim_end_matches(';').replace('/', "."),
        Some(b'B') => "byte".to_string(),
        Some(b'C') => "char".to_string(),
        Some(b'D') => "double".to_string(),
        Some(b'F') => "float".to_string(),
        Some(b'I') => "int".to_string(),
        Some(b'J') => "long".to_string(),
        Some(b'S') => "short".to_string(),
        Some(b'Z') => "boolean".to_string(),
        Some(b'V') => "void".to_string(),
        _ => sig.to_string(),
    };

    base + &"[]".repeat(dims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pretty_primitive() {
        assert_eq!(pretty_type_name("I"), "int");
        assert_eq!(pretty_type_name("Z"), "boolean");
    }

    #[test]
    fn test_pretty_class() {
        assert_eq!(pretty_type_name("LMain;"), "Main");
        assert_eq!(pretty_type_name("Ljava/lang/String;"), "java.lang.String");
    }

    #[test]
    fn test_pretty_arrays() {
        assert_eq!(pretty_type_name("[I"), "int[]");
        assert_eq!(
            pretty_type_name("[[Ljava/lang/String;"),
            "java.lang.String[][]"
        );
    }
}
