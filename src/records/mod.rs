//! Step records and change events flowing through the feed

mod types;

pub use types::{ChangeEvent, Cursor, DeviceClass, DeviceDescriptor, RecordType, StepRecord};
