// ObjectReference command implementations
//
// Runtime type lookup and method invocation on live objects. Invocation
// resumes only the invoking thread; with the rest of the target kept
// suspended, a toString() that touches shared state cannot race the
// target's other threads.

use crate::commands::{command_sets, invoke_options, object_reference_commands};
use crate::connection::JdwpConnection;
use crate::protocol::{CommandPacket, JdwpError, JdwpResult};
use crate::reader::{read_tagged_value, read_u64, read_u8};
use crate::types::{ClassId, MethodId, ObjectId, ReferenceTypeId, ThreadId, Value};
use bytes::BufMut;

impl JdwpConnection {
    /// ObjectReference.ReferenceType - the object's runtime class
    pub async fn object_type(&mut self, object_id: ObjectId) -> JdwpResult<ReferenceTypeId> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::OBJECT_REFERENCE,
            object_reference_commands::REFERENCE_TYPE,
        );

        packet.data.put_u64(object_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let _type_tag = read_u8(&mut data)?;
        read_u64(&mut data)
    }

    /// ObjectReference.InvokeMethod - call a zero-argument instance method
    /// on the paused event thread, single-threaded. An exception thrown by
    /// the target surfaces as [`JdwpError::InvokeThrew`].
    pub async fn invoke_method(
        &mut self,
        object_id: ObjectId,
        thread_id: ThreadId,
        class_id: ClassId,
        method_id: MethodId,
    ) -> JdwpResult<Value> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::OBJECT_REFERENCE,
            object_reference_commands::INVOKE_METHOD,
        );

        packet.data.put_u64(object_id);
        packet.data.put_u64(thread_id);
        packet.data.put_u64(class_id);
        packet.data.put_u64(method_id);
        packet.data.put_i32(0); // no arguments
        packet.data.put_i32(invoke_options::SINGLE_THREADED);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let value = read_tagged_value(&mut data)?;

        // Thrown exception, as a tagged object ID; 0 when none
        let _exception_tag = read_u8(&mut data)?;
        let exception_id = read_u64(&mut data)?;
        if exception_id != 0 {
            return Err(JdwpError::InvokeThrew(exception_id));
        }

        Ok(value)
    }
}
