// StackFrame command implementations
//
// Reads the values held in local variable slots of a suspended frame.

use crate::commands::{command_sets, stack_frame_commands};
use crate::connection::JdwpConnection;
use crate::protocol::{CommandPacket, JdwpResult};
use crate::reader::{read_i32, read_tagged_value};
use crate::types::{FrameId, ThreadId, Value};
use bytes::BufMut;

/// A slot to fetch: index plus the signature byte that tells the VM how to
/// tag the value it sends back.
#[derive(Debug, Clone)]
pub struct VariableSlot {
    pub slot: i32,
    pub sig_byte: u8,
}

impl JdwpConnection {
    /// StackFrame.GetValues - values for the requested slots, in request order
    pub async fn frame_values(
        &mut self,
        thread_id: ThreadId,
        frame_id: FrameId,
        slots: &[VariableSlot],
    ) -> JdwpResult<Vec<Value>> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::STACK_FRAME,
            stack_frame_commands::GET_VALUES,
        );

        packet.data.put_u64(thread_id);
        packet.data.put_u64(frame_id);

        packet.data.put_i32(slots.len() as i32);
        for slot in slots {
            packet.data.put_i32(slot.slot);
            packet.data.put_u8(slot.sig_byte);
        }

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let values_count = read_i32(&mut data)?;
        let mut values = Vec::with_capacity(values_count as usize);

        for _ in 0..values_count {
            values.push(read_tagged_value(&mut data)?);
        }

        Ok(values)
    }
}
