// ThreadReference command implementations
//
// The tracer only inspects the topmost frame of the event thread.

use crate::commands::{command_sets, thread_commands};
use crate::connection::JdwpConnection;
use crate::protocol::{CommandPacket, JdwpResult};
use crate::reader::{read_i32, read_u64, read_u8};
use crate::types::{FrameId, Location, ThreadId};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// One stack frame of a suspended thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub frame_id: FrameId,
    pub location: Location,
}

impl JdwpConnection {
    /// ThreadReference.Frames - `start_frame` 0 is the top of the stack,
    /// `length` -1 means all frames
    pub async fn frames(
        &mut self,
        thread_id: ThreadId,
        start_frame: i32,
        length: i32,
    ) -> JdwpResult<Vec<Frame>> {
        let id = self.next_id();
        let mut packet =
            CommandPacket::new(id, command_sets::THREAD_REFERENCE, thread_commands::FRAMES);

        packet.data.put_u64(thread_id);
        packet.data.put_i32(start_frame);
        packet.data.put_i32(length);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let frames_count = read_i32(&mut data)?;
        let mut frames = Vec::with_capacity(frames_count as usize);

        for _ in 0..frames_count {
            let frame_id = read_u64(&mut data)?;

            let type_tag = read_u8(&mut data)?;
            let class_id = read_u64(&mut data)?;
            let method_id = read_u64(&mut data)?;
            let index = read_u64(&mut data)?;

            frames.push(Frame {
                frame_id,
                location: Location {
                    type_tag,
                    class_id,
                    method_id,
                    index,
                },
            });
        }

        Ok(frames)
    }
}
