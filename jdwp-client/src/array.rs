// ArrayReference command implementations
//
// Array regions come back untagged when the element type is primitive:
// one tag byte for the whole region, then the raw values. Reference
// element regions carry a tag per value.

use crate::commands::{array_reference_commands, command_sets};
use crate::connection::JdwpConnection;
use crate::protocol::{CommandPacket, JdwpResult};
use crate::reader::{read_i32, read_tagged_value, read_u8, read_untagged_value};
use crate::types::{tags, ObjectId, Value};
use bytes::BufMut;

impl JdwpConnection {
    /// ArrayReference.Length
    pub async fn array_length(&mut self, array_id: ObjectId) -> JdwpResult<i32> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::ARRAY_REFERENCE,
            array_reference_commands::LENGTH,
        );

        packet.data.put_u64(array_id);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_i32(&mut data)
    }

    /// ArrayReference.GetValues - a contiguous range of elements
    pub async fn array_values(
        &mut self,
        array_id: ObjectId,
        first_index: i32,
        length: i32,
    ) -> JdwpResult<Vec<Value>> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::ARRAY_REFERENCE,
            array_reference_commands::GET_VALUES,
        );

        packet.data.put_u64(array_id);
        packet.data.put_i32(first_index);
        packet.data.put_i32(length);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        parse_array_region(&mut data)
    }
}

fn parse_array_region(buf: &mut &[u8]) -> JdwpResult<Vec<Value>> {
    let region_tag = read_u8(buf)?;
    let count = read_i32(buf)?;

    let mut values = Vec::with_capacity(count as usize);

    if tags::is_reference(region_tag) {
        for _ in 0..count {
            values.push(read_tagged_value(buf)?);
        }
    } else {
        for _ in 0..count {
            let data = read_untagged_value(region_tag, buf)?;
            values.push(Value {
                tag: region_tag,
                data,
            });
        }
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueData;

    #[test]
    fn test_parse_primitive_region() {
        let mut data = Vec::new();
        data.put_u8(tags::INT);
        data.put_i32(3);
        data.put_i32(10);
        data.put_i32(20);
        data.put_i32(30);

        let mut buf = &data[..];
        let values = parse_array_region(&mut buf).unwrap();
        assert_eq!(values.len(), 3);
        assert!(matches!(values[1].data, ValueData::Int(20)));
    }

    #[test]
    fn test_parse_reference_region() {
        let mut data = Vec::new();
        data.put_u8(tags::OBJECT);
        data.put_i32(2);
        data.put_u8(tags::STRING);
        data.put_u64(0xAB);
        data.put_u8(tags::OBJECT);
        data.put_u64(0); // null element

        let mut buf = &data[..];
        let values = parse_array_region(&mut buf).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].object_id(), Some(0xAB));
        assert_eq!(values[1].object_id(), Some(0));
    }
}
