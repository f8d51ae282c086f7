// EventRequest command implementations
//
// Creates and clears the three request kinds the tracer drives the target
// with: class-prepare notification, method-entry breakpoints, and
// line-granularity stepping.

use crate::commands::{
    command_sets, event_commands, event_kinds, event_modifiers, step_depths, step_sizes,
};
use crate::connection::JdwpConnection;
use crate::protocol::{CommandPacket, JdwpResult};
use crate::reader::read_i32;
use crate::types::{MethodId, ReferenceTypeId, ThreadId};
use bytes::BufMut;

/// Suspend policy for events
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum SuspendPolicy {
    None = 0,
    EventThread = 1,
    All = 2,
}

fn put_jdwp_string(data: &mut Vec<u8>, s: &str) {
    data.put_u32(s.len() as u32);
    data.extend_from_slice(s.as_bytes());
}

impl JdwpConnection {
    /// Request notification when a class matching `class_pattern` is
    /// prepared. Patterns may carry a leading or trailing `*`.
    pub async fn set_class_prepare(
        &mut self,
        class_pattern: &str,
        suspend_policy: SuspendPolicy,
    ) -> JdwpResult<i32> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(id, command_sets::EVENT_REQUEST, event_commands::SET);

        packet.data.put_u8(event_kinds::CLASS_PREPARE);
        packet.data.put_u8(suspend_policy as u8);

        packet.data.put_i32(1); // one modifier
        packet.data.put_u8(event_modifiers::CLASS_MATCH);
        put_jdwp_string(&mut packet.data, class_pattern);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_i32(&mut data)
    }

    /// Set a breakpoint at a bytecode location. Returns the request ID.
    pub async fn set_breakpoint(
        &mut self,
        class_id: ReferenceTypeId,
        method_id: MethodId,
        bytecode_index: u64,
        suspend_policy: SuspendPolicy,
    ) -> JdwpResult<i32> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(id, command_sets::EVENT_REQUEST, event_commands::SET);

        packet.data.put_u8(event_kinds::BREAKPOINT);
        packet.data.put_u8(suspend_policy as u8);

        packet.data.put_i32(1); // one modifier
        packet.data.put_u8(event_modifiers::LOCATION_ONLY);
        packet.data.put_u8(1); // type tag: class
        packet.data.put_u64(class_id);
        packet.data.put_u64(method_id);
        packet.data.put_u64(bytecode_index);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_i32(&mut data)
    }

    /// Arm line-granularity stepping on a thread, stepping over calls,
    /// restricted to classes matching `class_pattern`.
    pub async fn set_step(
        &mut self,
        thread_id: ThreadId,
        class_pattern: &str,
        suspend_policy: SuspendPolicy,
    ) -> JdwpResult<i32> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(id, command_sets::EVENT_REQUEST, event_commands::SET);

        packet.data.put_u8(event_kinds::SINGLE_STEP);
        packet.data.put_u8(suspend_policy as u8);

        packet.data.put_i32(2); // two modifiers
        packet.data.put_u8(event_modifiers::STEP);
        packet.data.put_u64(thread_id);
        packet.data.put_i32(step_sizes::LINE);
        packet.data.put_i32(step_depths::OVER);
        packet.data.put_u8(event_modifiers::CLASS_MATCH);
        put_jdwp_string(&mut packet.data, class_pattern);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_i32(&mut data)
    }

    /// EventRequest.Clear - withdraw a request so it never fires again
    pub async fn clear_request(&mut self, event_kind: u8, request_id: i32) -> JdwpResult<()> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(id, command_sets::EVENT_REQUEST, event_commands::CLEAR);

        packet.data.put_u8(event_kind);
        packet.data.put_i32(request_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_jdwp_string() {
        let mut data = Vec::new();
        put_jdwp_string(&mut data, "Main");
        assert_eq!(&data[..4], &[0, 0, 0, 4]);
        assert_eq!(&data[4..], b"Main");
    }
}
