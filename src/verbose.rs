//! Per-change log lines written to a caller-provided side-channel sink.
//!
//! Sink failures never abort the filter; a change log is best effort.

use std::fmt::Display;
use std::io::Write;

use ahash::AHashMap;

use crate::metadata::NameKind;

pub struct VerboseLogger<'a> {
    sink: &'a mut dyn Write,
    // class id -> name id, from pass-1 LOAD_CLASS records
    class_name_ids: AHashMap<u64, u64>,
    // name id -> symbol text, from pass-2 UTF8 records
    name_strings: AHashMap<u64, String>,
}

impl<'a> VerboseLogger<'a> {
    pub fn new(sink: &'a mut dyn Write) -> Self {
        VerboseLogger {
            sink,
            class_name_ids: AHashMap::new(),
            name_strings: AHashMap::new(),
        }
    }

    pub fn record_class_name_id(&mut self, class_id: u64, name_id: u64) {
        self.class_name_ids.entry(class_id).or_insert(name_id);
    }

    /// Remembers symbol text for later class/field name resolution. Only
    /// class and field names are ever looked up.
    pub fn record_name_string(
        &mut self,
        kind: Option<NameKind>,
        name_id: u64,
        value: &str,
        only_if_absent: bool,
    ) {
        if !matches!(kind, Some(NameKind::ClassName) | Some(NameKind::FieldName)) {
            return;
        }
        if only_if_absent {
            self.name_strings
                .entry(name_id)
                .or_insert_with(|| value.to_string());
        } else {
            self.name_strings.insert(name_id, value.to_string());
        }
    }

    pub fn resolve_class_name(&self, class_id: u64) -> String {
        match self.class_name_ids.get(&class_id) {
            Some(&name_id) => self.resolve_name(name_id, &format!("class#{class_id}")),
            None => format!("class#{class_id}"),
        }
    }

    pub fn resolve_name(&self, name_id: u64, fallback: &str) -> String {
        self.name_strings
            .get(&name_id)
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    }

    pub fn log_utf8_change(
        &mut self,
        kind: Option<NameKind>,
        name_id: u64,
        original: &str,
        transformed: &str,
    ) {
        let label = kind.map_or("UTF8", NameKind::label);
        let _ = writeln!(self.sink, "{label} id={name_id}: {original} -> {transformed}");
    }

    pub fn log_field_change(
        &mut self,
        class_name: &str,
        field_name: &str,
        old_value: &str,
        new_value: &str,
        is_static: bool,
    ) {
        let prefix = if is_static { "static " } else { "" };
        let _ = writeln!(
            self.sink,
            "{prefix}{class_name}.{field_name}: {old_value} -> {new_value}"
        );
    }

    /// Summarizes element changes as a count plus the first and last change.
    pub fn log_array_changes<T: Display>(
        &mut self,
        array_id: u64,
        type_name: &str,
        before: &[T],
        after: &[T],
        changed: impl Fn(&T, &T) -> bool,
    ) {
        let mut count = 0usize;
        let mut first: Option<String> = None;
        let mut last: Option<String> = None;
        for (i, (old, new)) in before.iter().zip(after.iter()).enumerate() {
            if changed(old, new) {
                count += 1;
                let change = format!("[{i}] {old} -> {new}");
                if first.is_none() {
                    first = Some(change.clone());
                }
                last = Some(change);
            }
        }
        let (Some(first), Some(last)) = (first, last) else {
            return;
        };
        if count == 1 {
            let _ = writeln!(self.sink, "array#{array_id} {type_name}: 1 changed ({first})");
        } else {
            let _ = writeln!(
                self.sink,
                "array#{array_id} {type_name}: {count} changed (first {first}, last {last})"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_lines_carry_the_kind_label() {
        let mut sink = Vec::new();
        let mut logger = VerboseLogger::new(&mut sink);
        logger.log_utf8_change(Some(NameKind::ClassName), 1, "MyClass", "0000000");
        logger.log_utf8_change(None, 9, "sym", "000");
        let log = String::from_utf8(sink).unwrap();
        assert!(log.contains("CLASS_NAME id=1: MyClass -> 0000000"));
        assert!(log.contains("UTF8 id=9: sym -> 000"));
    }

    #[test]
    fn class_names_resolve_through_both_tables() {
        let mut sink = Vec::new();
        let mut logger = VerboseLogger::new(&mut sink);
        logger.record_class_name_id(0x100, 1);
        logger.record_name_string(Some(NameKind::ClassName), 1, "MyClass", true);
        assert_eq!(logger.resolve_class_name(0x100), "MyClass");
        assert_eq!(logger.resolve_class_name(0x200), "class#512");
    }

    #[test]
    fn thread_names_are_not_retained() {
        let mut sink = Vec::new();
        let mut logger = VerboseLogger::new(&mut sink);
        logger.record_name_string(Some(NameKind::ThreadName), 4, "main", true);
        assert_eq!(logger.resolve_name(4, "field#4"), "field#4");
    }

    #[test]
    fn array_changes_are_summarized() {
        let mut sink = Vec::new();
        let mut logger = VerboseLogger::new(&mut sink);
        logger.log_array_changes(0x300, "int", &[1, 2, 3], &[0, 2, 0], |a, b| a != b);
        logger.log_array_changes(0x301, "int", &[5], &[0], |a, b| a != b);
        logger.log_array_changes(0x302, "int", &[5], &[5], |a, b| a != b);
        let log = String::from_utf8(sink).unwrap();
        assert!(log.contains("array#768 int: 2 changed (first [0] 1 -> 0, last [2] 3 -> 0)"));
        assert!(log.contains("array#769 int: 1 changed ([0] 5 -> 0)"));
        assert!(!log.contains("array#770"));
    }
}
