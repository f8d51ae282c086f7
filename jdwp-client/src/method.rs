// Method command implementations
//
// Per-method debug tables: source line mapping and local variable slots.

use crate::commands::{command_sets, method_commands};
use crate::connection::JdwpConnection;
use crate::protocol::{CommandPacket, JdwpResult};
use crate::reader::{read_i32, read_string, read_u32, read_u64};
use crate::types::{MethodId, ReferenceTypeId, Variable};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// One line table entry - maps a source line to its bytecode index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineTableEntry {
    pub line_code_index: u64,
    pub line_number: i32,
}

/// Complete line table for a method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineTable {
    pub start: u64,
    pub end: u64,
    pub lines: Vec<LineTableEntry>,
}

impl LineTable {
    /// The entry location of the method: the entry with the lowest bytecode
    /// index, which is where a method-entry breakpoint belongs.
    pub fn entry(&self) -> Option<&LineTableEntry> {
        self.lines.iter().min_by_key(|e| e.line_code_index)
    }

    /// The source line covering a bytecode index: the entry with the
    /// greatest code index not beyond it.
    pub fn line_at(&self, pc: u64) -> Option<i32> {
        self.lines
            .iter()
            .filter(|e| e.line_code_index <= pc)
            .max_by_key(|e| e.line_code_index)
            .map(|e| e.line_number)
    }
}

impl JdwpConnection {
    /// Method.LineTable
    pub async fn line_table(
        &mut self,
        ref_type_id: ReferenceTypeId,
        method_id: MethodId,
    ) -> JdwpResult<LineTable> {
        let id = self.next_id();
        let mut packet =
            CommandPacket::new(id, command_sets::METHOD, method_commands::LINE_TABLE);

        packet.data.put_u64(ref_type_id);
        packet.data.put_u64(method_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let start = read_u64(&mut data)?;
        let end = read_u64(&mut data)?;

        let lines_count = read_i32(&mut data)?;
        let mut lines = Vec::with_capacity(lines_count as usize);

        for _ in 0..lines_count {
            let line_code_index = read_u64(&mut data)?;
            let line_number = read_i32(&mut data)?;

            lines.push(LineTableEntry {
                line_code_index,
                line_number,
            });
        }

        Ok(LineTable { start, end, lines })
    }

    /// Method.VariableTable - names, signatures, and live ranges of locals
    pub async fn variable_table(
        &mut self,
        ref_type_id: ReferenceTypeId,
        method_id: MethodId,
    ) -> JdwpResult<Vec<Variable>> {
        let id = self.next_id();
        let mut packet =
            CommandPacket::new(id, command_sets::METHOD, method_commands::VARIABLE_TABLE);

        packet.data.put_u64(ref_type_id);
        packet.data.put_u64(method_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let _arg_count = read_i32(&mut data)?;

        let vars_count = read_i32(&mut data)?;
        let mut variables = Vec::with_capacity(vars_count as usize);

        for _ in 0..vars_count {
            let code_index = read_u64(&mut data)?;
            let name = read_string(&mut data)?;
            let signature = read_string(&mut data)?;
            let length = read_u32(&mut data)?;
            let slot = read_u32(&mut data)?;

            variables.push(Variable {
                code_index,
                name,
                signature,
                length,
                slot,
            });
        }

        Ok(variables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> LineTable {
        LineTable {
            start: 0,
            end: 30,
            lines: vec![
                LineTableEntry {
                    line_code_index: 0,
                    line_number: 5,
                },
                LineTableEntry {
                    line_code_index: 8,
                    line_number: 6,
                },
                LineTableEntry {
                    line_code_index: 20,
                    line_number: 8,
                },
            ],
        }
    }

    #[test]
    fn test_entry_is_lowest_code_index() {
        assert_eq!(table().entry().unwrap().line_number, 5);
    }

    #[test]
    fn test_line_at_picks_enclosing_entry() {
        let t = table();
        assert_eq!(t.line_at(0), Some(5));
        assert_eq!(t.line_at(7), Some(5));
        assert_eq!(t.line_at(8), Some(6));
        assert_eq!(t.line_at(25), Some(8));
    }

    #[test]
    fn test_line_at_empty_table() {
        let t = LineTable {
            start: 0,
            end: 0,
            lines: vec![],
        };
        assert_eq!(t.line_at(3), None);
        assert!(t.entry().is_none());
    }
}
