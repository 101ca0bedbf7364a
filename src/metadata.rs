//! In-memory state collected in pass 1 and refreshed in pass 2: class
//! layouts keyed by class id, and the semantic role under which each UTF-8
//! symbol was first referenced.

use std::sync::Arc;

use ahash::AHashMap;

use crate::record::FieldType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name_id: u64,
    pub field_type: FieldType,
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub super_class_id: u64,
    pub instance_fields: Vec<FieldDef>,
}

/// Class store with a memoized inherited-first field layout per class.
#[derive(Default)]
pub struct ClassMetadata {
    classes: AHashMap<u64, ClassInfo>,
    flattened_cache: AHashMap<u64, Arc<Vec<FieldType>>>,
}

impl ClassMetadata {
    /// Registers a class dump; a re-dump overwrites and drops the memo.
    pub fn insert(&mut self, class_id: u64, info: ClassInfo) {
        self.flattened_cache.remove(&class_id);
        self.classes.insert(class_id, info);
    }

    /// Inherited-first instance field types for `class_id`.
    ///
    /// Returns `None` when any ancestor has not been seen yet; the caller
    /// copies such instances opaquely. Class id 0 is the empty layout.
    pub fn flattened_types(&mut self, class_id: u64) -> Option<Arc<Vec<FieldType>>> {
        if class_id == 0 {
            return Some(Arc::new(Vec::new()));
        }
        if let Some(cached) = self.flattened_cache.get(&class_id) {
            return Some(Arc::clone(cached));
        }

        // walk up to the nearest memoized ancestor, then fold back down
        let mut chain = Vec::new();
        let mut flattened: Vec<FieldType> = Vec::new();
        let mut current = class_id;
        while current != 0 {
            if let Some(cached) = self.flattened_cache.get(&current) {
                flattened = cached.as_ref().clone();
                break;
            }
            if chain.len() > self.classes.len() {
                // super-class cycle, treat the layout as unresolved
                return None;
            }
            chain.push(current);
            current = self.classes.get(&current)?.super_class_id;
        }

        for &link in chain.iter().rev() {
            let info = self.classes.get(&link)?;
            flattened.extend(info.instance_fields.iter().map(|f| f.field_type));
            self.flattened_cache.insert(link, Arc::new(flattened.clone()));
        }
        self.flattened_cache.get(&class_id).map(Arc::clone)
    }

    /// Name-carrying variant of [`flattened_types`](Self::flattened_types),
    /// uncached; only the verbose change log needs it.
    pub fn flattened_fields(&self, class_id: u64) -> Option<Vec<FieldDef>> {
        self.flattened_fields_at(class_id, 0)
    }

    fn flattened_fields_at(&self, class_id: u64, depth: usize) -> Option<Vec<FieldDef>> {
        if class_id == 0 {
            return Some(Vec::new());
        }
        if depth > self.classes.len() {
            return None;
        }
        let info = self.classes.get(&class_id)?;
        let mut fields = self.flattened_fields_at(info.super_class_id, depth + 1)?;
        fields.extend(info.instance_fields.iter().copied());
        Some(fields)
    }
}

/// Semantic role a UTF-8 symbol was first referenced under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    ClassName,
    FieldName,
    MethodName,
    MethodSignature,
    SourceFileName,
    ThreadName,
    ThreadGroupName,
    ThreadGroupParentName,
}

impl NameKind {
    pub fn label(self) -> &'static str {
        match self {
            NameKind::ClassName => "CLASS_NAME",
            NameKind::FieldName => "FIELD_NAME",
            NameKind::MethodName => "METHOD_NAME",
            NameKind::MethodSignature => "METHOD_SIGNATURE",
            NameKind::SourceFileName => "SOURCE_FILE_NAME",
            NameKind::ThreadName => "THREAD_NAME",
            NameKind::ThreadGroupName => "THREAD_GROUP_NAME",
            NameKind::ThreadGroupParentName => "THREAD_GROUP_PARENT_NAME",
        }
    }
}

/// Symbol id to first-observed kind. A kind is never downgraded.
#[derive(Default)]
pub struct NameKindTable {
    kinds: AHashMap<u64, NameKind>,
}

impl NameKindTable {
    pub fn record(&mut self, name_id: u64, kind: NameKind) {
        self.kinds.entry(name_id).or_insert(kind);
    }

    pub fn kind_of(&self, name_id: u64) -> Option<NameKind> {
        self.kinds.get(&name_id).copied()
    }
}
