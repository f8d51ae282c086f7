// JDWP command set and command constants
//
// Only the sets the tracer exercises are listed:
// 1 = VirtualMachine
// 2 = ReferenceType
// 3 = ClassType
// 6 = Method
// 9 = ObjectReference
// 10 = StringReference
// 11 = ThreadReference
// 13 = ArrayReference
// 15 = EventRequest
// 16 = StackFrame

pub mod command_sets {
    pub const VIRTUAL_MACHINE: u8 = 1;
    pub const REFERENCE_TYPE: u8 = 2;
    pub const CLASS_TYPE: u8 = 3;
    pub const METHOD: u8 = 6;
    pub const OBJECT_REFERENCE: u8 = 9;
    pub const STRING_REFERENCE: u8 = 10;
    pub const THREAD_REFERENCE: u8 = 11;
    pub const ARRAY_REFERENCE: u8 = 13;
    pub const EVENT_REQUEST: u8 = 15;
    pub const STACK_FRAME: u8 = 16;
}

// VirtualMachine commands (set 1)
pub mod vm_commands {
    pub const VERSION: u8 = 1;
    pub const DISPOSE: u8 = 6;
    pub const ID_SIZES: u8 = 7;
    pub const RESUME: u8 = 9;
}

// ReferenceType commands (set 2)
pub mod reference_type_commands {
    pub const SIGNATURE: u8 = 1;
    pub const METHODS: u8 = 5;
    pub const SOURCE_FILE: u8 = 7;
}

// ClassType commands (set 3)
pub mod class_type_commands {
    pub const SUPERCLASS: u8 = 1;
}

// Method commands (set 6)
pub mod method_commands {
    pub const LINE_TABLE: u8 = 1;
    pub const VARIABLE_TABLE: u8 = 2;
}

// ObjectReference commands (set 9)
pub mod object_reference_commands {
    pub const REFERENCE_TYPE: u8 = 1;
    pub const INVOKE_METHOD: u8 = 6;
}

// StringReference commands (set 10)
pub mod string_reference_commands {
    pub const VALUE: u8 = 1;
}

// ThreadReference commands (set 11)
pub mod thread_commands {
    pub const FRAMES: u8 = 6;
}

// ArrayReference commands (set 13)
pub mod array_reference_commands {
    pub const LENGTH: u8 = 1;
    pub const GET_VALUES: u8 = 2;
}

// EventRequest commands (set 15)
pub mod event_commands {
    pub const SET: u8 = 1;
    pub const CLEAR: u8 = 2;
}

// StackFrame commands (set 16)
pub mod stack_frame_commands {
    pub const GET_VALUES: u8 = 1;
}

// Event kinds for EventRequest.Set and composite event packets
pub mod event_kinds {
    pub const SINGLE_STEP: u8 = 1;
    pub const BREAKPOINT: u8 = 2;
    pub const THREAD_START: u8 = 6;
    pub const THREAD_DEATH: u8 = 7;
    pub const CLASS_PREPARE: u8 = 8;
    pub const VM_START: u8 = 90;
    pub const VM_DEATH: u8 = 99;
}

// Modifier kinds for EventRequest.Set
pub mod event_modifiers {
    pub const CLASS_MATCH: u8 = 5;
    pub const LOCATION_ONLY: u8 = 7;
    pub const STEP: u8 = 10;
}

// Step sizes
pub mod step_sizes {
    pub const MIN: i32 = 0;
    pub const LINE: i32 = 1;
}

// Step depths
pub mod step_depths {
    pub const INTO: i32 = 0;
    pub const OVER: i32 = 1;
    pub const OUT: i32 = 2;
}

// Options for ObjectReference.InvokeMethod
pub mod invoke_options {
    /// Only the invoking thread runs while the method executes.
    pub const SINGLE_THREADED: i32 = 0x01;
}
