// ReferenceType and ClassType command implementations
//
// Class-level introspection: declared methods, the JNI signature, the
// source file name, and the superclass link for walking the hierarchy.

use crate::commands::{class_type_commands, command_sets, reference_type_commands};
use crate::connection::JdwpConnection;
use crate::protocol::{CommandPacket, JdwpResult};
use crate::reader::{read_i32, read_string, read_u64};
use crate::types::{ClassId, MethodId, ReferenceTypeId};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// Method information from ReferenceType.Methods
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodInfo {
    pub method_id: MethodId,
    pub name: String,
    pub signature: String,
    pub mod_bits: i32,
}

impl JdwpConnection {
    /// ReferenceType.Methods - the methods declared directly on a type
    pub async fn methods(&mut self, ref_type_id: ReferenceTypeId) -> JdwpResult<Vec<MethodInfo>> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::REFERENCE_TYPE,
            reference_type_commands::METHODS,
        );

        packet.data.put_u64(ref_type_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let methods_count = read_i32(&mut data)?;
        let mut methods = Vec::with_capacity(methods_count as usize);

        for _ in 0..methods_count {
            let method_id = read_u64(&mut data)?;
            let name = read_string(&mut data)?;
            let signature = read_string(&mut data)?;
            let mod_bits = read_i32(&mut data)?;

            methods.push(MethodInfo {
                method_id,
                name,
                signature,
                mod_bits,
            });
        }

        Ok(methods)
    }

    /// ReferenceType.Signature - the JNI signature, e.g. "LMain;"
    pub async fn type_signature(&mut self, ref_type_id: ReferenceTypeId) -> JdwpResult<String> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::REFERENCE_TYPE,
            reference_type_commands::SIGNATURE,
        );

        packet.data.put_u64(ref_type_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_string(&mut data)
    }

    /// ReferenceType.SourceFile - the source file name recorded at compile
    /// time; errors with ABSENT_INFORMATION when the class carries none
    pub async fn source_file(&mut self, ref_type_id: ReferenceTypeId) -> JdwpResult<String> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::REFERENCE_TYPE,
            reference_type_commands::SOURCE_FILE,
        );

        packet.data.put_u64(ref_type_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_string(&mut data)
    }

    /// ClassType.Superclass - 0 once past java.lang.Object
    pub async fn superclass(&mut self, class_id: ClassId) -> JdwpResult<ClassId> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::CLASS_TYPE,
            class_type_commands::SUPERCLASS,
        );

        packet.data.put_u64(class_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_u64(&mut data)
    }
}
