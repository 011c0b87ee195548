//! JSON text in the layout produced by Python's `json.dumps` defaults
//!
//! Existing front-ends parse the recommendation payload as a string and
//! compare it byte-for-byte against what the previous backend emitted, so the
//! separators (`", "` and `": "`) and ASCII-only escaping are reproduced here.

use std::io;

use serde::Serialize;
use serde_json::ser::Formatter;

use crate::utils::error::Result;

/// `serde_json` formatter matching `json.dumps(obj)` with default arguments
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonCompatFormatter;

impl Formatter for PythonCompatFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        // ensure_ascii: everything outside ' '..='~' becomes \uXXXX (UTF-16 units)
        let mut units = [0u16; 2];
        for ch in fragment.chars() {
            if (' '..='~').contains(&ch) {
                writer.write_all(&[ch as u8])?;
            } else {
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

/// Serialize `value` the way Python's `json.dumps(value)` would
pub fn to_python_json<T: ?Sized + Serialize>(value: &T) -> Result<String> {
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, PythonCompatFormatter);
    value.serialize(&mut serializer)?;
    // The formatter only ever writes ASCII
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Inner<'a> {
        disease_name: &'a str,
        crop_type: &'a str,
        recommendations: Vec<&'a str>,
    }

    #[test]
    fn test_separators_match_python() {
        let inner = Inner {
            disease_name: "Black Sigatoka",
            crop_type: "Banana",
            recommendations: vec!["Remove infected leaves", "Improve drainage"],
        };
        assert_eq!(
            to_python_json(&inner).unwrap(),
            r#"{"disease_name": "Black Sigatoka", "crop_type": "Banana", "recommendations": ["Remove infected leaves", "Improve drainage"]}"#
        );
    }

    #[test]
    fn test_empty_containers() {
        assert_eq!(to_python_json(&json!([])).unwrap(), "[]");
        assert_eq!(
            to_python_json(&json!({"recommendations": []})).unwrap(),
            r#"{"recommendations": []}"#
        );
    }

    #[test]
    fn test_non_ascii_is_escaped() {
        // json.dumps("café ☕ 🍌") == '"caf\\u00e9 \\u2615 \\ud83c\\udf4c"'
        assert_eq!(
            to_python_json("café ☕ 🍌").unwrap(),
            r#""caf\u00e9 \u2615 \ud83c\udf4c""#
        );
        assert_eq!(to_python_json("a\u{7f}b").unwrap(), r#""a\u007fb""#);
    }

    #[test]
    fn test_nested_string_is_escaped_once_more() {
        let inner = to_python_json(&json!({"a": "b"})).unwrap();
        let outer = to_python_json(&json!({"result": inner})).unwrap();
        assert_eq!(outer, r#"{"result": "{\"a\": \"b\"}"}"#);
    }
}
