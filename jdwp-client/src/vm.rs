// VirtualMachine command implementations
//
// Session-level commands: version banner, ID size negotiation, resume,
// and session disposal.

use crate::commands::{command_sets, vm_commands};
use crate::connection::JdwpConnection;
use crate::protocol::{CommandPacket, JdwpResult};
use crate::reader::{read_i32, read_string};
use serde::{Deserialize, Serialize};

/// Target VM version information (VirtualMachine.Version)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmVersion {
    pub description: String,
    pub jdwp_major: i32,
    pub jdwp_minor: i32,
    pub vm_version: String,
    pub vm_name: String,
}

/// ID widths used by the target VM (VirtualMachine.IDSizes)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmIdSizes {
    pub field_id_size: i32,
    pub method_id_size: i32,
    pub object_id_size: i32,
    pub reference_type_id_size: i32,
    pub frame_id_size: i32,
}

impl JdwpConnection {
    /// VirtualMachine.Version
    pub async fn version(&mut self) -> JdwpResult<VmVersion> {
        let id = self.next_id();
        let packet = CommandPacket::new(id, command_sets::VIRTUAL_MACHINE, vm_commands::VERSION);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let description = read_string(&mut data)?;
        let jdwp_major = read_i32(&mut data)?;
        let jdwp_minor = read_i32(&mut data)?;
        let vm_version = read_string(&mut data)?;
        let vm_name = read_string(&mut data)?;

        Ok(VmVersion {
            description,
            jdwp_major,
            jdwp_minor,
            vm_version,
            vm_name,
        })
    }

    /// VirtualMachine.IDSizes
    pub async fn id_sizes(&mut self) -> JdwpResult<VmIdSizes> {
        let id = self.next_id();
        let packet = CommandPacket::new(id, command_sets::VIRTUAL_MACHINE, vm_commands::ID_SIZES);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let field_id_size = read_i32(&mut data)?;
        let method_id_size = read_i32(&mut data)?;
        let object_id_size = read_i32(&mut data)?;
        let reference_type_id_size = read_i32(&mut data)?;
        let frame_id_size = read_i32(&mut data)?;

        Ok(VmIdSizes {
            field_id_size,
            method_id_size,
            object_id_size,
            reference_type_id_size,
            frame_id_size,
        })
    }

    /// VirtualMachine.Resume - resume every suspended thread
    pub async fn resume_all(&mut self) -> JdwpResult<()> {
        let id = self.next_id();
        let packet = CommandPacket::new(id, command_sets::VIRTUAL_MACHINE, vm_commands::RESUME);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        Ok(())
    }

    /// VirtualMachine.Dispose - end the debug session; the target continues
    pub async fn dispose(&mut self) -> JdwpResult<()> {
        let id = self.next_id();
        let packet = CommandPacket::new(id, command_sets::VIRTUAL_MACHINE, vm_commands::DISPOSE);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        Ok(())
    }
}
