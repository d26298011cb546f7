//! Serial link to the attached microcontroller
//!
//! The port runs 8N1 with no flow control at the configured speed.

mod reader;

pub use reader::{ByteSource, SerialReader, CHUNK_SIZE};
