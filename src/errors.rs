use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HprofRedactError {
    #[error("i/o error: {e}")]
    StdIoError {
        #[from]
        e: io::Error,
    },
    #[error("invalid hprof file: {message}")]
    InvalidHprofFile { message: String },
    #[error("unsupported id size: {id_size}")]
    UnsupportedIdSize { id_size: u32 },
    #[error("unexpected {record} record length: {length}")]
    RecordLengthMismatch { record: &'static str, length: u32 },
    #[error("heap dump segment length mismatch: {remaining} bytes left")]
    SegmentLengthMismatch { remaining: u64 },
    #[error("instance dump length mismatch: expected {expected} but was {actual}")]
    InstanceLengthMismatch { expected: u64, actual: u32 },
    #[error("invalid UTF8 record length: {length}")]
    InvalidUtf8Length { length: u32 },
    #[error("transformed UTF8 record too large: {length} bytes")]
    Utf8TooLarge { length: u64 },
    #[error("unsupported heap dump subrecord tag: {tag:#04x}")]
    UnsupportedSubRecordTag { tag: u8 },
    #[error("unsupported field type: {code:#04x}")]
    UnsupportedFieldType { code: u8 },
    #[error("unknown transformer: {name}")]
    UnknownTransformer { name: String },
}
