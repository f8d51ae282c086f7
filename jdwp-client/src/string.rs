// StringReference command implementations

use crate::commands::{command_sets, string_reference_commands};
use crate::connection::JdwpConnection;
use crate::protocol::{CommandPacket, JdwpResult};
use crate::reader::read_string;
use crate::types::StringId;
use bytes::BufMut;

impl JdwpConnection {
    /// StringReference.Value - the UTF-8 contents of a String object
    pub async fn string_value(&mut self, string_id: StringId) -> JdwpResult<String> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::STRING_REFERENCE,
            string_reference_commands::VALUE,
        );

        packet.data.put_u64(string_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_string(&mut data)
    }
}
