//! The pluggable value-transformer contract and the bundled policies.
//!
//! String hooks return `None` (or an equal string) to signal "no change";
//! the rewriter then emits the original record bytes verbatim. Scalar hooks
//! default to identity, and the bulk array hooks default to applying the
//! matching scalar hook to every element in ascending index order.

use crate::errors::HprofRedactError;
use crate::mutf8;

pub trait HprofTransformer {
    /// Backstop for every string hook below.
    fn transform_utf8(&self, value: &str) -> Option<String> {
        let _ = value;
        None
    }

    /// Generic hook for method names, method signatures and symbols with no
    /// observed kind; HPROF does not always allow telling these apart.
    fn transform_utf8_string(&self, value: &str) -> Option<String> {
        self.transform_utf8(value)
    }

    fn transform_class_name(&self, value: &str) -> Option<String> {
        self.transform_utf8(value)
    }

    fn transform_field_name(&self, value: &str) -> Option<String> {
        self.transform_utf8(value)
    }

    fn transform_source_file_name(&self, value: &str) -> Option<String> {
        self.transform_utf8(value)
    }

    fn transform_thread_name(&self, value: &str) -> Option<String> {
        self.transform_utf8(value)
    }

    fn transform_thread_group_name(&self, value: &str) -> Option<String> {
        self.transform_utf8(value)
    }

    fn transform_thread_group_parent_name(&self, value: &str) -> Option<String> {
        self.transform_utf8(value)
    }

    fn transform_boolean(&self, value: bool) -> bool {
        value
    }

    fn transform_byte(&self, value: i8) -> i8 {
        value
    }

    fn transform_short(&self, value: i16) -> i16 {
        value
    }

    /// Chars are UTF-16 code units on the wire.
    fn transform_char(&self, value: u16) -> u16 {
        value
    }

    fn transform_int(&self, value: i32) -> i32 {
        value
    }

    fn transform_long(&self, value: i64) -> i64 {
        value
    }

    fn transform_float(&self, value: f32) -> f32 {
        value
    }

    fn transform_double(&self, value: f64) -> f64 {
        value
    }

    fn transform_boolean_array(&self, values: &mut [bool]) {
        for value in values.iter_mut() {
            *value = self.transform_boolean(*value);
        }
    }

    fn transform_byte_array(&self, values: &mut [i8]) {
        for value in values.iter_mut() {
            *value = self.transform_byte(*value);
        }
    }

    fn transform_short_array(&self, values: &mut [i16]) {
        for value in values.iter_mut() {
            *value = self.transform_short(*value);
        }
    }

    fn transform_char_array(&self, values: &mut [u16]) {
        for value in values.iter_mut() {
            *value = self.transform_char(*value);
        }
    }

    fn transform_int_array(&self, values: &mut [i32]) {
        for value in values.iter_mut() {
            *value = self.transform_int(*value);
        }
    }

    fn transform_long_array(&self, values: &mut [i64]) {
        for value in values.iter_mut() {
            *value = self.transform_long(*value);
        }
    }

    fn transform_float_array(&self, values: &mut [f32]) {
        for value in values.iter_mut() {
            *value = self.transform_float(*value);
        }
    }

    fn transform_double_array(&self, values: &mut [f64]) {
        for value in values.iter_mut() {
            *value = self.transform_double(*value);
        }
    }
}

/// Leaves every value untouched; the output is byte-identical to the input.
pub struct NoOpTransformer;

impl HprofTransformer for NoOpTransformer {}

/// Replaces a string with `'0'` repeated to the original's MUTF-8 byte
/// length, so the binary format keeps its size after transformation.
pub fn zero_preserving_string(value: &str) -> String {
    "0".repeat(mutf8::encoded_len(value))
}

/// Zeros all primitive values and blanks strings length-preservingly.
pub struct ZeroTransformer;

impl HprofTransformer for ZeroTransformer {
    fn transform_utf8(&self, value: &str) -> Option<String> {
        Some(zero_preserving_string(value))
    }

    fn transform_boolean(&self, _value: bool) -> bool {
        false
    }

    fn transform_byte(&self, _value: i8) -> i8 {
        0
    }

    fn transform_short(&self, _value: i16) -> i16 {
        0
    }

    fn transform_char(&self, _value: u16) -> u16 {
        0
    }

    fn transform_int(&self, _value: i32) -> i32 {
        0
    }

    fn transform_long(&self, _value: i64) -> i64 {
        0
    }

    fn transform_float(&self, _value: f32) -> f32 {
        0.0
    }

    fn transform_double(&self, _value: f64) -> f64 {
        0.0
    }
}

/// Blanks strings length-preservingly; primitives pass through.
pub struct ZeroStringTransformer;

impl HprofTransformer for ZeroStringTransformer {
    fn transform_utf8(&self, value: &str) -> Option<String> {
        Some(zero_preserving_string(value))
    }
}

/// Replaces every string with the empty string. Records shrink and byte
/// offsets shift downstream; accepted by design.
pub struct DropStringTransformer;

impl HprofTransformer for DropStringTransformer {
    fn transform_utf8(&self, _value: &str) -> Option<String> {
        Some(String::new())
    }
}

/// Resolves a transformer by CLI name; case-insensitive, `_` and `-` are
/// interchangeable, an empty name selects the default.
pub fn from_name(name: &str) -> Result<Box<dyn HprofTransformer>, HprofRedactError> {
    let normalized = name.trim().to_lowercase().replace('_', "-");
    match normalized.as_str() {
        "" | "zero" => Ok(Box::new(ZeroTransformer)),
        "zero-strings" => Ok(Box::new(ZeroStringTransformer)),
        "drop-strings" => Ok(Box::new(DropStringTransformer)),
        _ => Err(HprofRedactError::UnknownTransformer {
            name: name.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hooks_signal_no_change() {
        let t = NoOpTransformer;
        assert_eq!(t.transform_utf8_string("abc"), None);
        assert_eq!(t.transform_class_name("abc"), None);
        assert_eq!(t.transform_int(7), 7);
        assert!(t.transform_boolean(true));
    }

    #[test]
    fn zero_transformer_zeros_scalars() {
        let t = ZeroTransformer;
        assert!(!t.transform_boolean(true));
        assert_eq!(t.transform_byte(-3), 0);
        assert_eq!(t.transform_short(-3), 0);
        assert_eq!(t.transform_char(b'x'.into()), 0);
        assert_eq!(t.transform_int(34_534_534), 0);
        assert_eq!(t.transform_long(-1), 0);
        assert_eq!(t.transform_float(1.5).to_bits(), 0);
        assert_eq!(t.transform_double(1.5).to_bits(), 0);
    }

    #[test]
    fn zero_transformer_preserves_string_byte_length() {
        let t = ZeroTransformer;
        assert_eq!(t.transform_utf8_string("MyClass").unwrap(), "0000000");
        assert_eq!(t.transform_class_name("value").unwrap(), "00000");
        // "Café" is 5 bytes in MUTF-8
        assert_eq!(t.transform_utf8_string("Café").unwrap(), "00000");
    }

    #[test]
    fn bulk_hooks_default_to_per_element_application() {
        let t = ZeroTransformer;
        let mut ints = [1, 2, 3];
        t.transform_int_array(&mut ints);
        assert_eq!(ints, [0, 0, 0]);

        let mut chars = [u16::from(b'H'), u16::from(b'i'), u16::from(b'!')];
        t.transform_char_array(&mut chars);
        assert_eq!(chars, [0, 0, 0]);
    }

    #[test]
    fn zero_strings_leaves_primitives_alone() {
        let t = ZeroStringTransformer;
        assert_eq!(t.transform_int(42), 42);
        assert_eq!(t.transform_utf8_string("abc").unwrap(), "000");
    }

    #[test]
    fn drop_strings_empties_strings() {
        let t = DropStringTransformer;
        assert_eq!(t.transform_utf8_string("abc").unwrap(), "");
        assert_eq!(t.transform_thread_name("main").unwrap(), "");
        assert_eq!(t.transform_long(9), 9);
    }

    #[test]
    fn names_are_normalized() {
        assert!(from_name("zero").is_ok());
        assert!(from_name("ZERO_STRINGS").is_ok());
        assert!(from_name(" Drop-Strings ").is_ok());
        assert!(from_name("").is_ok());
        assert!(matches!(
            from_name("bogus"),
            Err(HprofRedactError::UnknownTransformer { .. })
        ));
    }
}
