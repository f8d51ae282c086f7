// JDWP composite event packets
//
// The VM pushes these asynchronously to report class preparation,
// breakpoint and step hits, and lifecycle transitions.

use crate::commands::event_kinds;
use crate::reader::{read_i32, read_string, read_u64, read_u8};
use crate::types::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Composite event packet (can contain multiple events)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSet {
    pub suspend_policy: u8,
    pub events: Vec<Event>,
}

/// Single event within an event set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: u8,
    pub request_id: i32,
    pub details: EventKind,
}

/// Every event kind the tracer reacts to, plus an explicit fallback so an
/// unrecognized kind is skipped instead of failing the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    VmStart {
        thread: ThreadId,
    },
    VmDeath,
    ThreadStart {
        thread: ThreadId,
    },
    ThreadDeath {
        thread: ThreadId,
    },
    ClassPrepare {
        thread: ThreadId,
        ref_type: ReferenceTypeId,
        signature: String,
        status: i32,
    },
    Breakpoint {
        thread: ThreadId,
        location: Location,
    },
    Step {
        thread: ThreadId,
        location: Location,
    },
    Unknown {
        kind: u8,
    },
}

/// Parse the body of a composite event packet
pub fn parse_event_packet(data: &[u8]) -> crate::protocol::JdwpResult<EventSet> {
    let mut buf = data;

    let suspend_policy = read_u8(&mut buf)?;
    let event_count = read_i32(&mut buf)?;

    let mut events = Vec::with_capacity(event_count as usize);

    for _ in 0..event_count {
        let kind = read_u8(&mut buf)?;
        let request_id = read_i32(&mut buf)?;

        let details = match kind {
            event_kinds::BREAKPOINT => {
                let thread = read_u64(&mut buf)?;
                let location = read_location(&mut buf)?;
                EventKind::Breakpoint { thread, location }
            }
            event_kinds::SINGLE_STEP => {
                let thread = read_u64(&mut buf)?;
                let location = read_location(&mut buf)?;
                EventKind::Step { thread, location }
            }
            event_kinds::CLASS_PREPARE => {
                let thread = read_u64(&mut buf)?;
                let _ref_type_tag = read_u8(&mut buf)?;
                let ref_type = read_u64(&mut buf)?;
                let signature = read_string(&mut buf)?;
                let status = read_i32(&mut buf)?;
                EventKind::ClassPrepare {
                    thread,
                    ref_type,
                    signature,
                    status,
                }
            }
            event_kinds::VM_START => {
                let thread = read_u64(&mut buf)?;
                EventKind::VmStart { thread }
            }
            event_kinds::VM_DEATH => EventKind::VmDeath,
            event_kinds::THREAD_START => {
                let thread = read_u64(&mut buf)?;
                EventKind::ThreadStart { thread }
            }
            event_kinds::THREAD_DEATH => {
                let thread = read_u64(&mut buf)?;
                EventKind::ThreadDeath { thread }
            }
            _ => {
                warn!("Unsupported event kind: {}", kind);
                // No layout known for this kind, so the rest of the packet
                // cannot be parsed reliably; stop here.
                events.push(Event {
                    kind,
                    request_id,
                    details: EventKind::Unknown { kind },
                });
                break;
            }
        };

        events.push(Event {
            kind,
            request_id,
            details,
        });
    }

    Ok(EventSet {
        suspend_policy,
        events,
    })
}

fn read_location(buf: &mut &[u8]) -> crate::protocol::JdwpResult<Location> {
    let type_tag = read_u8(buf)?;
    let class_id = read_u64(buf)?;
    let method_id = read_u64(buf)?;
    let index = read_u64(buf)?;

    Ok(Location {
        type_tag,
        class_id,
        method_id,
        index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn put_location(buf: &mut Vec<u8>, class_id: u64, method_id: u64, index: u64) {
        buf.put_u8(1);
        buf.put_u64(class_id);
        buf.put_u64(method_id);
        buf.put_u64(index);
    }

    #[test]
    fn test_parse_breakpoint_event() {
        let mut data = Vec::new();
        data.put_u8(2); // suspend all
        data.put_i32(1); // one event
        data.put_u8(event_kinds::BREAKPOINT);
        data.put_i32(99); // request id
        data.put_u64(7); // thread
        put_location(&mut data, 0x10, 0x20, 5);

        let set = parse_event_packet(&data).unwrap();
        assert_eq!(set.suspend_policy, 2);
        assert_eq!(set.events.len(), 1);
        assert_eq!(set.events[0].request_id, 99);
        match &set.events[0].details {
            EventKind::Breakpoint { thread, location } => {
                assert_eq!(*thread, 7);
                assert_eq!(location.class_id, 0x10);
                assert_eq!(location.index, 5);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_class_prepare_event() {
        let mut data = Vec::new();
        data.put_u8(2);
        data.put_i32(1);
        data.put_u8(event_kinds::CLASS_PREPARE);
        data.put_i32(3);
        data.put_u64(7); // thread
        data.put_u8(1); // ref type tag: class
        data.put_u64(0x42); // type id
        data.put_u32(6); // signature length
        data.extend_from_slice(b"LMain;");
        data.put_i32(7); // status

        let set = parse_event_packet(&data).unwrap();
        match &set.events[0].details {
            EventKind::ClassPrepare {
                ref_type,
                signature,
                ..
            } => {
                assert_eq!(*ref_type, 0x42);
                assert_eq!(signature, "LMain;");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_kind_is_not_fatal() {
        let mut data = Vec::new();
        data.put_u8(0);
        data.put_i32(1);
        data.put_u8(41); // METHOD_EXIT, which the tracer never requests
        data.put_i32(5);

        let set = parse_event_packet(&data).unwrap();
        assert!(matches!(
            set.events[0].details,
            EventKind::Unknown { kind: 41 }
        ));
    }
}
