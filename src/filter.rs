//! Two-pass transforming copy of an HPROF stream.
//!
//! Pass 1 scans the input end-to-end and only populates the class metadata
//! and name-kind tables; UTF-8 symbols are frequently written after the
//! records that reference them, so classification must complete before any
//! symbol is rewritten. Pass 2 re-opens the input and performs the copy,
//! consulting the transformer for every primitive and string payload while
//! leaving record framing, identifiers and object topology untouched.

use std::fmt::Display;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::errors::HprofRedactError;
use crate::io::{open_input, premature_eof, HprofDataInput, HprofDataOutput, SegmentReader};
use crate::metadata::{ClassInfo, ClassMetadata, FieldDef, NameKind, NameKindTable};
use crate::mutf8;
use crate::record::*;
use crate::transformer::HprofTransformer;
use crate::verbose::VerboseLogger;

/// Tag counters collected during the rewrite pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilterStats {
    pub records: u64,
    pub utf8_records: u64,
    pub utf8_rewritten: u64,
    pub heap_dump_segments: u64,
    pub gc_sub_records: u64,
    pub class_dumps: u64,
    pub instance_dumps: u64,
    pub opaque_instance_dumps: u64,
    pub object_array_dumps: u64,
    pub primitive_array_dumps: u64,
}

/// Filters `input_path` into `output` under `transformer`.
pub fn filter(
    input_path: &Path,
    output: impl Write,
    transformer: &dyn HprofTransformer,
) -> Result<FilterStats, HprofRedactError> {
    HprofFilter::new(transformer).filter(input_path, output)
}

pub struct HprofFilter<'a> {
    transformer: &'a dyn HprofTransformer,
    verbose_sink: Option<&'a mut dyn Write>,
}

impl<'a> HprofFilter<'a> {
    pub fn new(transformer: &'a dyn HprofTransformer) -> Self {
        HprofFilter {
            transformer,
            verbose_sink: None,
        }
    }

    /// Like [`new`](Self::new), additionally logging every change to `sink`.
    pub fn with_verbose_sink(transformer: &'a dyn HprofTransformer, sink: &'a mut dyn Write) -> Self {
        HprofFilter {
            transformer,
            verbose_sink: Some(sink),
        }
    }

    /// Runs both passes. The input must be a re-openable path; a one-shot
    /// pipe cannot be scanned twice.
    pub fn filter(
        self,
        input_path: &Path,
        output: impl Write,
    ) -> Result<FilterStats, HprofRedactError> {
        let mut pass = FilterPass {
            transformer: self.transformer,
            metadata: ClassMetadata::default(),
            name_kinds: NameKindTable::default(),
            verbose: self.verbose_sink.map(VerboseLogger::new),
            stats: FilterStats::default(),
            id_size: 4,
        };

        {
            let mut input = HprofDataInput::new(open_input(input_path)?);
            let header = FileHeader::read(&mut input)?;
            input.set_id_size(header.id_size);
            pass.id_size = header.id_size;
            pass.scan_records(&mut input)?;
        }

        let mut input = HprofDataInput::new(open_input(input_path)?);
        let mut out = HprofDataOutput::new(output);
        let header = FileHeader::read(&mut input)?;

        out.write_bytes(&header.magic)?;
        out.write_u4(header.id_size)?;
        out.write_u8(header.timestamp_ms)?;

        input.set_id_size(header.id_size);
        out.set_id_size(header.id_size);
        pass.id_size = header.id_size;

        pass.rewrite_records(&mut input, &mut out)?;
        out.flush()?;
        Ok(pass.stats)
    }
}

struct FilterPass<'a> {
    transformer: &'a dyn HprofTransformer,
    metadata: ClassMetadata,
    name_kinds: NameKindTable,
    verbose: Option<VerboseLogger<'a>>,
    stats: FilterStats,
    id_size: u32,
}

impl<'a> FilterPass<'a> {
    // ---- pass 1: metadata scan ----

    fn scan_records<R: Read>(
        &mut self,
        input: &mut HprofDataInput<R>,
    ) -> Result<(), HprofRedactError> {
        while let Some(tag) = input.read_tag()? {
            input.read_u4()?; // time
            let length = input.read_u4()?;
            match tag {
                HPROF_LOAD_CLASS => self.scan_load_class(input)?,
                HPROF_START_THREAD => self.scan_start_thread(input)?,
                HPROF_FRAME => self.scan_frame(input)?,
                HPROF_HEAP_DUMP | HPROF_HEAP_DUMP_SEGMENT => {
                    self.scan_heap_dump_segment(input, u64::from(length))?;
                }
                _ => input.skip_fully(u64::from(length))?,
            }
        }
        Ok(())
    }

    fn scan_load_class<R: Read>(
        &mut self,
        input: &mut HprofDataInput<R>,
    ) -> Result<(), HprofRedactError> {
        input.skip_fully(4)?; // class serial
        let class_id = input.read_id()?;
        input.skip_fully(4)?; // stack trace serial
        let name_id = input.read_id()?;
        self.name_kinds.record(name_id, NameKind::ClassName);
        if let Some(verbose) = self.verbose.as_mut() {
            verbose.record_class_name_id(class_id, name_id);
        }
        Ok(())
    }

    fn scan_start_thread<R: Read>(
        &mut self,
        input: &mut HprofDataInput<R>,
    ) -> Result<(), HprofRedactError> {
        // thread serial, thread object id, stack trace serial
        input.skip_fully(4 + u64::from(self.id_size) + 4)?;
        let thread_name_id = input.read_id()?;
        let thread_group_name_id = input.read_id()?;
        let thread_group_parent_name_id = input.read_id()?;
        self.name_kinds.record(thread_name_id, NameKind::ThreadName);
        self.name_kinds
            .record(thread_group_name_id, NameKind::ThreadGroupName);
        self.name_kinds
            .record(thread_group_parent_name_id, NameKind::ThreadGroupParentName);
        Ok(())
    }

    fn scan_frame<R: Read>(
        &mut self,
        input: &mut HprofDataInput<R>,
    ) -> Result<(), HprofRedactError> {
        input.skip_fully(u64::from(self.id_size))?; // frame id
        let method_name_id = input.read_id()?;
        let method_signature_id = input.read_id()?;
        let source_file_name_id = input.read_id()?;
        input.skip_fully(4 + 4)?; // class serial, line number
        self.name_kinds.record(method_name_id, NameKind::MethodName);
        self.name_kinds
            .record(method_signature_id, NameKind::MethodSignature);
        self.name_kinds
            .record(source_file_name_id, NameKind::SourceFileName);
        Ok(())
    }

    fn scan_heap_dump_segment<R: Read>(
        &mut self,
        input: &mut HprofDataInput<R>,
        length: u64,
    ) -> Result<(), HprofRedactError> {
        let id = u64::from(self.id_size);
        let mut segment = HprofDataInput::with_id_size(SegmentReader::new(input, length), self.id_size);

        while segment.get_ref().remaining() > 0 {
            let sub_tag = segment.read_u1()?;
            match sub_tag {
                HPROF_GC_ROOT_UNKNOWN | HPROF_GC_ROOT_STICKY_CLASS | HPROF_GC_ROOT_MONITOR_USED => {
                    segment.skip_fully(id)?;
                }
                HPROF_GC_ROOT_JNI_GLOBAL => segment.skip_fully(id + id)?,
                HPROF_GC_ROOT_JNI_LOCAL | HPROF_GC_ROOT_JAVA_FRAME | HPROF_GC_ROOT_THREAD_OBJ => {
                    segment.skip_fully(id + 4 + 4)?;
                }
                HPROF_GC_ROOT_NATIVE_STACK | HPROF_GC_ROOT_THREAD_BLOCK => {
                    segment.skip_fully(id + 4)?;
                }
                HPROF_GC_CLASS_DUMP => self.scan_class_dump(&mut segment)?,
                HPROF_GC_INSTANCE_DUMP => self.skip_instance_dump(&mut segment)?,
                HPROF_GC_OBJ_ARRAY_DUMP => self.skip_object_array_dump(&mut segment)?,
                HPROF_GC_PRIM_ARRAY_DUMP => self.skip_primitive_array_dump(&mut segment)?,
                tag => return Err(HprofRedactError::UnsupportedSubRecordTag { tag }),
            }
        }

        let remaining = segment.get_ref().remaining();
        if remaining != 0 {
            return Err(HprofRedactError::SegmentLengthMismatch { remaining });
        }
        Ok(())
    }

    fn scan_class_dump<R: Read>(
        &mut self,
        input: &mut HprofDataInput<R>,
    ) -> Result<(), HprofRedactError> {
        let id = u64::from(self.id_size);
        let class_id = input.read_id()?;
        input.skip_fully(4)?; // stack trace serial
        let super_class_id = input.read_id()?;
        // class loader, signers, protection domain, reserved1, reserved2
        input.skip_fully(id * 5)?;
        input.skip_fully(4)?; // instance size

        let constant_pool_size = input.read_u2()?;
        for _ in 0..constant_pool_size {
            input.skip_fully(2)?;
            let field_type = FieldType::from_code(input.read_u1()?)?;
            input.skip_fully(field_type.byte_size(self.id_size))?;
        }

        let static_field_count = input.read_u2()?;
        for _ in 0..static_field_count {
            let name_id = input.read_id()?;
            let field_type = FieldType::from_code(input.read_u1()?)?;
            input.skip_fully(field_type.byte_size(self.id_size))?;
            self.name_kinds.record(name_id, NameKind::FieldName);
        }

        let instance_field_count = input.read_u2()?;
        let mut instance_fields = Vec::with_capacity(usize::from(instance_field_count));
        for _ in 0..instance_field_count {
            let name_id = input.read_id()?;
            let field_type = FieldType::from_code(input.read_u1()?)?;
            instance_fields.push(FieldDef {
                name_id,
                field_type,
            });
            self.name_kinds.record(name_id, NameKind::FieldName);
        }

        self.metadata.insert(
            class_id,
            ClassInfo {
                super_class_id,
                instance_fields,
            },
        );
        Ok(())
    }

    fn skip_instance_dump<R: Read>(
        &mut self,
        input: &mut HprofDataInput<R>,
    ) -> Result<(), HprofRedactError> {
        let id = u64::from(self.id_size);
        input.skip_fully(id + 4 + id)?;
        let data_length = input.read_u4()?;
        input.skip_fully(u64::from(data_length))
    }

    fn skip_object_array_dump<R: Read>(
        &mut self,
        input: &mut HprofDataInput<R>,
    ) -> Result<(), HprofRedactError> {
        let id = u64::from(self.id_size);
        input.skip_fully(id + 4)?;
        let num_elements = input.read_u4()?;
        input.skip_fully(id)?;
        input.skip_fully(u64::from(num_elements) * id)
    }

    fn skip_primitive_array_dump<R: Read>(
        &mut self,
        input: &mut HprofDataInput<R>,
    ) -> Result<(), HprofRedactError> {
        let id = u64::from(self.id_size);
        input.skip_fully(id + 4)?;
        let num_elements = input.read_u4()?;
        let element_type = FieldType::from_code(input.read_u1()?)?;
        input.skip_fully(u64::from(num_elements) * element_type.byte_size(self.id_size))
    }

    // ---- pass 2: transforming copy ----

    fn rewrite_records<R: Read, W: Write>(
        &mut self,
        input: &mut HprofDataInput<R>,
        out: &mut HprofDataOutput<W>,
    ) -> Result<(), HprofRedactError> {
        while let Some(tag) = input.read_tag()? {
            let time = input.read_u4()?;
            let length = input.read_u4()?;
            self.stats.records += 1;
            match tag {
                HPROF_UTF8 => self.rewrite_utf8_record(input, out, time, length)?,
                HPROF_HEAP_DUMP | HPROF_HEAP_DUMP_SEGMENT => {
                    self.stats.heap_dump_segments += 1;
                    write_record_header(out, tag, time, length)?;
                    self.rewrite_heap_dump_segment(input, out, u64::from(length))?;
                }
                HPROF_LOAD_CLASS => self.rewrite_load_class(input, out, time, length)?,
                HPROF_START_THREAD => self.rewrite_start_thread(input, out, time, length)?,
                HPROF_FRAME => self.rewrite_frame(input, out, time, length)?,
                _ => {
                    write_record_header(out, tag, time, length)?;
                    copy_bytes(input, out, u64::from(length))?;
                }
            }
        }
        Ok(())
    }

    /// UTF8 record: id, then MUTF-8 bytes with no terminator. The length is
    /// recomputed on change; on "no change" (or undecodable content) the
    /// original bytes are emitted so unchanged symbols round-trip exactly.
    fn rewrite_utf8_record<R: Read, W: Write>(
        &mut self,
        input: &mut HprofDataInput<R>,
        out: &mut HprofDataOutput<W>,
        time: u32,
        length: u32,
    ) -> Result<(), HprofRedactError> {
        self.stats.utf8_records += 1;
        let Some(bytes_length) = length.checked_sub(self.id_size) else {
            return Err(HprofRedactError::InvalidUtf8Length { length });
        };
        let name_id = input.read_id()?;
        let mut data = vec![0u8; bytes_length as usize];
        input.read_exact(&mut data)?;

        let original = match mutf8::decode(&data) {
            Ok(original) => original,
            Err(_) => {
                // undecodable symbol, safest is to preserve the bytes exactly
                write_record_header(out, HPROF_UTF8, time, length)?;
                out.write_id(name_id)?;
                out.write_bytes(&data)?;
                return Ok(());
            }
        };

        let kind = self.name_kinds.kind_of(name_id);
        let transformed = match self.transform_name(&original, kind) {
            Some(transformed) if transformed != original => transformed,
            _ => {
                // preserve the original bytes (and therefore the size)
                write_record_header(out, HPROF_UTF8, time, length)?;
                out.write_id(name_id)?;
                out.write_bytes(&data)?;
                if let Some(verbose) = self.verbose.as_mut() {
                    verbose.record_name_string(kind, name_id, &original, true);
                }
                return Ok(());
            }
        };

        let out_bytes = mutf8::encode(&transformed);
        let new_length = u64::from(self.id_size) + out_bytes.len() as u64;
        if new_length > u64::from(u32::MAX) {
            return Err(HprofRedactError::Utf8TooLarge { length: new_length });
        }

        write_record_header(out, HPROF_UTF8, time, new_length as u32)?;
        out.write_id(name_id)?;
        out.write_bytes(&out_bytes)?;
        self.stats.utf8_rewritten += 1;
        if let Some(verbose) = self.verbose.as_mut() {
            verbose.record_name_string(kind, name_id, &transformed, false);
            verbose.log_utf8_change(kind, name_id, &original, &transformed);
        }
        Ok(())
    }

    fn transform_name(&self, original: &str, kind: Option<NameKind>) -> Option<String> {
        match kind {
            None => self.transformer.transform_utf8_string(original),
            Some(NameKind::ClassName) => self.transformer.transform_class_name(original),
            Some(NameKind::FieldName) => self.transformer.transform_field_name(original),
            // method names and signatures cannot always be told apart from
            // other symbols, both go through the generic hook
            Some(NameKind::MethodName) | Some(NameKind::MethodSignature) => {
                self.transformer.transform_utf8_string(original)
            }
            Some(NameKind::SourceFileName) => self.transformer.transform_source_file_name(original),
            Some(NameKind::ThreadName) => self.transformer.transform_thread_name(original),
            Some(NameKind::ThreadGroupName) => {
                self.transformer.transform_thread_group_name(original)
            }
            Some(NameKind::ThreadGroupParentName) => {
                self.transformer.transform_thread_group_parent_name(original)
            }
        }
    }

    fn rewrite_load_class<R: Read, W: Write>(
        &mut self,
        input: &mut HprofDataInput<R>,
        out: &mut HprofDataOutput<W>,
        time: u32,
        length: u32,
    ) -> Result<(), HprofRedactError> {
        let id = u64::from(self.id_size);
        if u64::from(length) != 4 + id + 4 + id {
            return Err(HprofRedactError::RecordLengthMismatch {
                record: "LOAD_CLASS",
                length,
            });
        }
        let class_serial = input.read_u4()?;
        let class_id = input.read_id()?;
        let stack_trace_serial = input.read_u4()?;
        let name_id = input.read_id()?;
        self.name_kinds.record(name_id, NameKind::ClassName);

        write_record_header(out, HPROF_LOAD_CLASS, time, length)?;
        out.write_u4(class_serial)?;
        out.write_id(class_id)?;
        out.write_u4(stack_trace_serial)?;
        out.write_id(name_id)?;
        Ok(())
    }

    fn rewrite_start_thread<R: Read, W: Write>(
        &mut self,
        input: &mut HprofDataInput<R>,
        out: &mut HprofDataOutput<W>,
        time: u32,
        length: u32,
    ) -> Result<(), HprofRedactError> {
        let id = u64::from(self.id_size);
        if u64::from(length) != 4 + id + 4 + id + id + id {
            return Err(HprofRedactError::RecordLengthMismatch {
                record: "START_THREAD",
                length,
            });
        }
        let thread_serial = input.read_u4()?;
        let thread_object_id = input.read_id()?;
        let stack_trace_serial = input.read_u4()?;
        let thread_name_id = input.read_id()?;
        let thread_group_name_id = input.read_id()?;
        let thread_group_parent_name_id = input.read_id()?;

        self.name_kinds.record(thread_name_id, NameKind::ThreadName);
        self.name_kinds
            .record(thread_group_name_id, NameKind::ThreadGroupName);
        self.name_kinds
            .record(thread_group_parent_name_id, NameKind::ThreadGroupParentName);

        write_record_header(out, HPROF_START_THREAD, time, length)?;
        out.write_u4(thread_serial)?;
        out.write_id(thread_object_id)?;
        out.write_u4(stack_trace_serial)?;
        out.write_id(thread_name_id)?;
        out.write_id(thread_group_name_id)?;
        out.write_id(thread_group_parent_name_id)?;
        Ok(())
    }

    fn rewrite_frame<R: Read, W: Write>(
        &mut self,
        input: &mut HprofDataInput<R>,
        out: &mut HprofDataOutput<W>,
        time: u32,
        length: u32,
    ) -> Result<(), HprofRedactError> {
        let id = u64::from(self.id_size);
        if u64::from(length) != id * 4 + 8 {
            return Err(HprofRedactError::RecordLengthMismatch {
                record: "FRAME",
                length,
            });
        }
        let frame_id = input.read_id()?;
        let method_name_id = input.read_id()?;
        let method_signature_id = input.read_id()?;
        let source_file_name_id = input.read_id()?;
        let class_serial = input.read_u4()?;
        let line_number = input.read_u4()?;

        self.name_kinds.record(method_name_id, NameKind::MethodName);
        self.name_kinds
            .record(method_signature_id, NameKind::MethodSignature);
        self.name_kinds
            .record(source_file_name_id, NameKind::SourceFileName);

        write_record_header(out, HPROF_FRAME, time, length)?;
        out.write_id(frame_id)?;
        out.write_id(method_name_id)?;
        out.write_id(method_signature_id)?;
        out.write_id(source_file_name_id)?;
        out.write_u4(class_serial)?;
        out.write_u4(line_number)?;
        Ok(())
    }

    fn rewrite_heap_dump_segment<R: Read, W: Write>(
        &mut self,
        input: &mut HprofDataInput<R>,
        out: &mut HprofDataOutput<W>,
        length: u64,
    ) -> Result<(), HprofRedactError> {
        let id = u64::from(self.id_size);
        let mut segment = HprofDataInput::with_id_size(SegmentReader::new(input, length), self.id_size);

        while segment.get_ref().remaining() > 0 {
            let sub_tag = segment.read_u1()?;
            out.write_u1(sub_tag)?;
            self.stats.gc_sub_records += 1;
            match sub_tag {
                // GC roots have fixed-size payloads with nothing to redact
                HPROF_GC_ROOT_UNKNOWN | HPROF_GC_ROOT_STICKY_CLASS | HPROF_GC_ROOT_MONITOR_USED => {
                    copy_bytes(&mut segment, out, id)?;
                }
                HPROF_GC_ROOT_JNI_GLOBAL => copy_bytes(&mut segment, out, id + id)?,
                HPROF_GC_ROOT_JNI_LOCAL | HPROF_GC_ROOT_JAVA_FRAME | HPROF_GC_ROOT_THREAD_OBJ => {
                    copy_bytes(&mut segment, out, id + 4 + 4)?;
                }
                HPROF_GC_ROOT_NATIVE_STACK | HPROF_GC_ROOT_THREAD_BLOCK => {
                    copy_bytes(&mut segment, out, id + 4)?;
                }
                HPROF_GC_CLASS_DUMP => self.rewrite_class_dump(&mut segment, out)?,
                HPROF_GC_INSTANCE_DUMP => self.rewrite_instance_dump(&mut segment, out)?,
                HPROF_GC_OBJ_ARRAY_DUMP => self.rewrite_object_array_dump(&mut segment, out)?,
                HPROF_GC_PRIM_ARRAY_DUMP => self.rewrite_primitive_array_dump(&mut segment, out)?,
                tag => return Err(HprofRedactError::UnsupportedSubRecordTag { tag }),
            }
        }

        let remaining = segment.get_ref().remaining();
        if remaining != 0 {
            return Err(HprofRedactError::SegmentLengthMismatch { remaining });
        }
        Ok(())
    }

    /// Class dump: header ids, constant pool, static fields, instance field
    /// definitions. Static and constant-pool values are transformed; the
    /// instance field definitions refresh the metadata store.
    fn rewrite_class_dump<R: Read, W: Write>(
        &mut self,
        input: &mut HprofDataInput<R>,
        out: &mut HprofDataOutput<W>,
    ) -> Result<(), HprofRedactError> {
        self.stats.class_dumps += 1;
        let class_id = input.read_id()?;
        let stack_trace_serial = input.read_u4()?;
        let super_class_id = input.read_id()?;
        let class_loader_id = input.read_id()?;
        let signers_id = input.read_id()?;
        let protection_domain_id = input.read_id()?;
        let reserved1 = input.read_id()?;
        let reserved2 = input.read_id()?;
        let instance_size = input.read_u4()?;

        out.write_id(class_id)?;
        out.write_u4(stack_trace_serial)?;
        out.write_id(super_class_id)?;
        out.write_id(class_loader_id)?;
        out.write_id(signers_id)?;
        out.write_id(protection_domain_id)?;
        out.write_id(reserved1)?;
        out.write_id(reserved2)?;
        out.write_u4(instance_size)?;

        let constant_pool_size = input.read_u2()?;
        out.write_u2(constant_pool_size)?;
        for _ in 0..constant_pool_size {
            let index = input.read_u2()?;
            let field_type = FieldType::from_code(input.read_u1()?)?;
            out.write_u2(index)?;
            out.write_u1(field_type.code())?;
            self.rewrite_value(input, out, field_type)?;
        }

        let static_field_count = input.read_u2()?;
        out.write_u2(static_field_count)?;
        let class_name = self.resolve_class_name(class_id);
        for _ in 0..static_field_count {
            let name_id = input.read_id()?;
            let field_type = FieldType::from_code(input.read_u1()?)?;
            out.write_id(name_id)?;
            out.write_u1(field_type.code())?;
            let field_name = self.resolve_field_name(name_id);
            self.rewrite_field_value(input, out, field_type, &class_name, &field_name, true)?;
            self.name_kinds.record(name_id, NameKind::FieldName);
        }

        let instance_field_count = input.read_u2()?;
        out.write_u2(instance_field_count)?;
        let mut instance_fields = Vec::with_capacity(usize::from(instance_field_count));
        for _ in 0..instance_field_count {
            let name_id = input.read_id()?;
            let field_type = FieldType::from_code(input.read_u1()?)?;
            out.write_id(name_id)?;
            out.write_u1(field_type.code())?;
            instance_fields.push(FieldDef {
                name_id,
                field_type,
            });
            self.name_kinds.record(name_id, NameKind::FieldName);
        }

        self.metadata.insert(
            class_id,
            ClassInfo {
                super_class_id,
                instance_fields,
            },
        );
        Ok(())
    }

    /// Instance dump: when the class chain resolves, the declared data
    /// length must equal the width sum of the flattened layout and every
    /// field flows through the transformer; otherwise the body is copied
    /// verbatim.
    fn rewrite_instance_dump<R: Read, W: Write>(
        &mut self,
        input: &mut HprofDataInput<R>,
        out: &mut HprofDataOutput<W>,
    ) -> Result<(), HprofRedactError> {
        self.stats.instance_dumps += 1;
        let object_id = input.read_id()?;
        let stack_trace_serial = input.read_u4()?;
        let class_id = input.read_id()?;
        let data_length = input.read_u4()?;

        out.write_id(object_id)?;
        out.write_u4(stack_trace_serial)?;
        out.write_id(class_id)?;
        out.write_u4(data_length)?;

        let Some(flattened) = self.metadata.flattened_types(class_id) else {
            self.stats.opaque_instance_dumps += 1;
            return copy_bytes(input, out, u64::from(data_length));
        };

        let expected: u64 = flattened
            .iter()
            .map(|field_type| field_type.byte_size(self.id_size))
            .sum();
        if expected != u64::from(data_length) {
            return Err(HprofRedactError::InstanceLengthMismatch {
                expected,
                actual: data_length,
            });
        }

        if self.verbose.is_none() {
            for &field_type in flattened.iter() {
                self.rewrite_value(input, out, field_type)?;
            }
            return Ok(());
        }

        match self.metadata.flattened_fields(class_id) {
            Some(field_defs) if field_defs.len() == flattened.len() => {
                let class_name = self.resolve_class_name(class_id);
                for def in &field_defs {
                    let field_name = self.resolve_field_name(def.name_id);
                    self.rewrite_field_value(
                        input,
                        out,
                        def.field_type,
                        &class_name,
                        &field_name,
                        false,
                    )?;
                }
            }
            _ => {
                for &field_type in flattened.iter() {
                    self.rewrite_value(input, out, field_type)?;
                }
            }
        }
        Ok(())
    }

    /// Object arrays carry identity, not payload: element ids are copied
    /// unchanged and never offered to the transformer.
    fn rewrite_object_array_dump<R: Read, W: Write>(
        &mut self,
        input: &mut HprofDataInput<R>,
        out: &mut HprofDataOutput<W>,
    ) -> Result<(), HprofRedactError> {
        self.stats.object_array_dumps += 1;
        let array_id = input.read_id()?;
        let stack_trace_serial = input.read_u4()?;
        let num_elements = input.read_u4()?;
        let array_class_id = input.read_id()?;

        out.write_id(array_id)?;
        out.write_u4(stack_trace_serial)?;
        out.write_u4(num_elements)?;
        out.write_id(array_class_id)?;

        for _ in 0..num_elements {
            out.write_id(input.read_id()?)?;
        }
        Ok(())
    }

    fn rewrite_primitive_array_dump<R: Read, W: Write>(
        &mut self,
        input: &mut HprofDataInput<R>,
        out: &mut HprofDataOutput<W>,
    ) -> Result<(), HprofRedactError> {
        self.stats.primitive_array_dumps += 1;
        let array_id = input.read_id()?;
        let stack_trace_serial = input.read_u4()?;
        let num_elements = input.read_u4()?;
        let element_type = FieldType::from_code(input.read_u1()?)?;

        out.write_id(array_id)?;
        out.write_u4(stack_trace_serial)?;
        out.write_u4(num_elements)?;
        out.write_u1(element_type.code())?;

        let count = num_elements as usize;
        match element_type {
            FieldType::Bool => {
                let mut raw = vec![0u8; count];
                input.read_exact(&mut raw)?;
                let mut values: Vec<bool> = raw.iter().map(|&b| b != 0).collect();
                let before = self.verbose.is_some().then(|| values.clone());
                self.transformer.transform_boolean_array(&mut values);
                self.log_array_changes(array_id, "boolean", before.as_deref(), &values, |a, b| {
                    a != b
                });
                for (i, &value) in values.iter().enumerate() {
                    // unchanged elements keep their raw byte, even non-0/1 ones
                    if value == (raw[i] != 0) {
                        out.write_u1(raw[i])?;
                    } else {
                        out.write_u1(u8::from(value))?;
                    }
                }
            }
            FieldType::Byte => {
                let mut raw = vec![0u8; count];
                input.read_exact(&mut raw)?;
                let mut values: Vec<i8> = raw.iter().map(|&b| b as i8).collect();
                let before = self.verbose.is_some().then(|| values.clone());
                self.transformer.transform_byte_array(&mut values);
                self.log_array_changes(array_id, "byte", before.as_deref(), &values, |a, b| a != b);
                for &value in &values {
                    out.write_u1(value as u8)?;
                }
            }
            FieldType::Char => {
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(input.read_u2()?);
                }
                let before = self.verbose.is_some().then(|| values.clone());
                self.transformer.transform_char_array(&mut values);
                self.log_array_changes(array_id, "char", before.as_deref(), &values, |a, b| a != b);
                for &value in &values {
                    out.write_u2(value)?;
                }
            }
            FieldType::Short => {
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(input.read_u2()? as i16);
                }
                let before = self.verbose.is_some().then(|| values.clone());
                self.transformer.transform_short_array(&mut values);
                self.log_array_changes(array_id, "short", before.as_deref(), &values, |a, b| {
                    a != b
                });
                for &value in &values {
                    out.write_u2(value as u16)?;
                }
            }
            FieldType::Int => {
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(input.read_u4()? as i32);
                }
                let before = self.verbose.is_some().then(|| values.clone());
                self.transformer.transform_int_array(&mut values);
                self.log_array_changes(array_id, "int", before.as_deref(), &values, |a, b| a != b);
                for &value in &values {
                    out.write_u4(value as u32)?;
                }
            }
            FieldType::Long => {
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(input.read_u8()? as i64);
                }
                let before = self.verbose.is_some().then(|| values.clone());
                self.transformer.transform_long_array(&mut values);
                self.log_array_changes(array_id, "long", before.as_deref(), &values, |a, b| a != b);
                for &value in &values {
                    out.write_u8(value as u64)?;
                }
            }
            FieldType::Float => {
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(f32::from_bits(input.read_u4()?));
                }
                let before = self.verbose.is_some().then(|| values.clone());
                self.transformer.transform_float_array(&mut values);
                self.log_array_changes(array_id, "float", before.as_deref(), &values, |a, b| {
                    a.to_bits() != b.to_bits()
                });
                for &value in &values {
                    out.write_u4(value.to_bits())?;
                }
            }
            FieldType::Double => {
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(f64::from_bits(input.read_u8()?));
                }
                let before = self.verbose.is_some().then(|| values.clone());
                self.transformer.transform_double_array(&mut values);
                self.log_array_changes(array_id, "double", before.as_deref(), &values, |a, b| {
                    a.to_bits() != b.to_bits()
                });
                for &value in &values {
                    out.write_u8(value.to_bits())?;
                }
            }
            // not produced by HotSpot, copy identifiers through if present
            FieldType::Object | FieldType::ArrayObject => {
                for _ in 0..num_elements {
                    out.write_id(input.read_id()?)?;
                }
            }
        }
        Ok(())
    }

    /// Reads one typed value, consults the transformer, re-serializes.
    fn rewrite_value<R: Read, W: Write>(
        &mut self,
        input: &mut HprofDataInput<R>,
        out: &mut HprofDataOutput<W>,
        field_type: FieldType,
    ) -> Result<(), HprofRedactError> {
        match field_type {
            FieldType::Object | FieldType::ArrayObject => out.write_id(input.read_id()?)?,
            FieldType::Bool => {
                let raw = input.read_u1()?;
                let value = raw != 0;
                let transformed = self.transformer.transform_boolean(value);
                // the raw byte survives a no-change, even when it is not 0/1
                out.write_u1(if transformed == value {
                    raw
                } else {
                    u8::from(transformed)
                })?;
            }
            FieldType::Byte => {
                let value = input.read_u1()? as i8;
                out.write_u1(self.transformer.transform_byte(value) as u8)?;
            }
            FieldType::Char => {
                let value = input.read_u2()?;
                out.write_u2(self.transformer.transform_char(value))?;
            }
            FieldType::Short => {
                let value = input.read_u2()? as i16;
                out.write_u2(self.transformer.transform_short(value) as u16)?;
            }
            FieldType::Int => {
                let value = input.read_u4()? as i32;
                out.write_u4(self.transformer.transform_int(value) as u32)?;
            }
            FieldType::Long => {
                let value = input.read_u8()? as i64;
                out.write_u8(self.transformer.transform_long(value) as u64)?;
            }
            FieldType::Float => {
                let value = f32::from_bits(input.read_u4()?);
                out.write_u4(self.transformer.transform_float(value).to_bits())?;
            }
            FieldType::Double => {
                let value = f64::from_bits(input.read_u8()?);
                out.write_u8(self.transformer.transform_double(value).to_bits())?;
            }
        }
        Ok(())
    }

    /// [`rewrite_value`](Self::rewrite_value) plus a change-log line naming
    /// the class and field.
    fn rewrite_field_value<R: Read, W: Write>(
        &mut self,
        input: &mut HprofDataInput<R>,
        out: &mut HprofDataOutput<W>,
        field_type: FieldType,
        class_name: &str,
        field_name: &str,
        is_static: bool,
    ) -> Result<(), HprofRedactError> {
        if self.verbose.is_none() {
            return self.rewrite_value(input, out, field_type);
        }
        match field_type {
            FieldType::Object | FieldType::ArrayObject => out.write_id(input.read_id()?)?,
            FieldType::Bool => {
                let raw = input.read_u1()?;
                let value = raw != 0;
                let transformed = self.transformer.transform_boolean(value);
                out.write_u1(if transformed == value {
                    raw
                } else {
                    u8::from(transformed)
                })?;
                if transformed != value {
                    self.log_field_change(class_name, field_name, value, transformed, is_static);
                }
            }
            FieldType::Byte => {
                let value = input.read_u1()? as i8;
                let transformed = self.transformer.transform_byte(value);
                out.write_u1(transformed as u8)?;
                if transformed != value {
                    self.log_field_change(class_name, field_name, value, transformed, is_static);
                }
            }
            FieldType::Char => {
                let value = input.read_u2()?;
                let transformed = self.transformer.transform_char(value);
                out.write_u2(transformed)?;
                if transformed != value {
                    self.log_field_change(class_name, field_name, value, transformed, is_static);
                }
            }
            FieldType::Short => {
                let value = input.read_u2()? as i16;
                let transformed = self.transformer.transform_short(value);
                out.write_u2(transformed as u16)?;
                if transformed != value {
                    self.log_field_change(class_name, field_name, value, transformed, is_static);
                }
            }
            FieldType::Int => {
                let value = input.read_u4()? as i32;
                let transformed = self.transformer.transform_int(value);
                out.write_u4(transformed as u32)?;
                if transformed != value {
                    self.log_field_change(class_name, field_name, value, transformed, is_static);
                }
            }
            FieldType::Long => {
                let value = input.read_u8()? as i64;
                let transformed = self.transformer.transform_long(value);
                out.write_u8(transformed as u64)?;
                if transformed != value {
                    self.log_field_change(class_name, field_name, value, transformed, is_static);
                }
            }
            FieldType::Float => {
                let bits = input.read_u4()?;
                let value = f32::from_bits(bits);
                let transformed = self.transformer.transform_float(value);
                out.write_u4(transformed.to_bits())?;
                if transformed.to_bits() != bits {
                    self.log_field_change(class_name, field_name, value, transformed, is_static);
                }
            }
            FieldType::Double => {
                let bits = input.read_u8()?;
                let value = f64::from_bits(bits);
                let transformed = self.transformer.transform_double(value);
                out.write_u8(transformed.to_bits())?;
                if transformed.to_bits() != bits {
                    self.log_field_change(class_name, field_name, value, transformed, is_static);
                }
            }
        }
        Ok(())
    }

    fn resolve_class_name(&self, class_id: u64) -> String {
        match self.verbose.as_ref() {
            Some(verbose) => verbose.resolve_class_name(class_id),
            None => format!("class#{class_id}"),
        }
    }

    fn resolve_field_name(&self, name_id: u64) -> String {
        let fallback = format!("field#{name_id}");
        match self.verbose.as_ref() {
            Some(verbose) => verbose.resolve_name(name_id, &fallback),
            None => fallback,
        }
    }

    fn log_field_change(
        &mut self,
        class_name: &str,
        field_name: &str,
        old_value: impl Display,
        new_value: impl Display,
        is_static: bool,
    ) {
        if let Some(verbose) = self.verbose.as_mut() {
            verbose.log_field_change(
                class_name,
                field_name,
                &old_value.to_string(),
                &new_value.to_string(),
                is_static,
            );
        }
    }

    fn log_array_changes<T: Display>(
        &mut self,
        array_id: u64,
        type_name: &str,
        before: Option<&[T]>,
        after: &[T],
        changed: impl Fn(&T, &T) -> bool,
    ) {
        if let (Some(verbose), Some(before)) = (self.verbose.as_mut(), before) {
            verbose.log_array_changes(array_id, type_name, before, after, changed);
        }
    }
}

fn write_record_header<W: Write>(
    out: &mut HprofDataOutput<W>,
    tag: u8,
    time: u32,
    length: u32,
) -> Result<(), HprofRedactError> {
    out.write_u1(tag)?;
    out.write_u4(time)?;
    out.write_u4(length)?;
    Ok(())
}

fn copy_bytes<R: Read, W: Write>(
    input: &mut HprofDataInput<R>,
    out: &mut HprofDataOutput<W>,
    length: u64,
) -> Result<(), HprofRedactError> {
    if length == 0 {
        return Ok(());
    }
    let copied = io::copy(&mut Read::take(&mut *input, length), out)?;
    if copied != length {
        return Err(premature_eof());
    }
    Ok(())
}
