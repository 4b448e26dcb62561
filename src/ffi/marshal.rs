//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Marshaling helpers shared by the runtimes
//!
//! The native API passes strings as NUL-terminated buffers, argument vectors
//! as NULL-terminated `char*` arrays, and variable-length values through a
//! "query the length, then fill" protocol. These helpers keep that dance out
//! of the container code.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::error::{Error, Result};

/// Convert a Rust string into a C string, rejecting interior NUL bytes.
pub fn to_cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| Error::NulByte(s.to_string()))
}

/// Validate that a string can cross the boundary without conversion errors.
pub fn check(s: &str) -> Result<&str> {
    if s.as_bytes().contains(&0) {
        return Err(Error::NulByte(s.to_string()));
    }
    Ok(s)
}

/// Validate every element of a string list.
pub fn check_all<S: AsRef<str>>(items: &[S]) -> Result<()> {
    for item in items {
        check(item.as_ref())?;
    }
    Ok(())
}

/// Copy a borrowed C string. NULL becomes `None`.
///
/// # Safety
/// `ptr` must be NULL or point to a valid NUL-terminated string.
pub unsafe fn from_cstr(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

/// Read a value through the two-call sizing protocol.
///
/// `fill` is called first with no buffer and must return the value's length
/// (`<= 0` meaning absent). It is then called with a buffer of `len + 1`
/// bytes and must return the same length. Any mismatch, or a value that is
/// not valid UTF-8, is reported as absent rather than as a partial result.
pub fn read_sized_string<F>(mut fill: F) -> Option<String>
where
    F: FnMut(Option<&mut [u8]>) -> i32,
{
    let len = fill(None);
    if len <= 0 {
        return None;
    }

    let len = len as usize;
    let mut buffer = vec![0u8; len + 1];
    let written = fill(Some(&mut buffer));
    if written < 0 || written as usize != len {
        return None;
    }

    buffer.truncate(len);
    String::from_utf8(buffer).ok()
}

/// Serve a value through the two-call sizing protocol (the producer side of
/// [`read_sized_string`]). Copies at most `buf.len() - 1` bytes followed by a
/// NUL and always returns the full length.
pub fn write_sized_string(value: &str, buf: Option<&mut [u8]>) -> i32 {
    let bytes = value.as_bytes();
    if let Some(buf) = buf {
        if !buf.is_empty() {
            let n = bytes.len().min(buf.len() - 1);
            buf[..n].copy_from_slice(&bytes[..n]);
            buf[n] = 0;
        }
    }
    i32::try_from(bytes.len()).unwrap_or(i32::MAX)
}

/// Split a newline-separated runtime value into its entries.
pub fn split_lines(value: Option<String>) -> Vec<String> {
    match value {
        Some(v) => v
            .trim()
            .lines()
            .map(|l| l.to_string())
            .filter(|l| !l.is_empty())
            .collect(),
        None => Vec::new(),
    }
}

/// A NULL-terminated `char*` array that owns its strings.
#[derive(Debug)]
pub struct CStringArray {
    _strings: Vec<CString>,
    pointers: Vec<*mut c_char>,
}

impl CStringArray {
    pub fn new<S: AsRef<str>>(items: &[S]) -> Result<Self> {
        let strings = items
            .iter()
            .map(|s| to_cstring(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let mut pointers: Vec<*mut c_char> =
            strings.iter().map(|s| s.as_ptr() as *mut c_char).collect();
        pointers.push(ptr::null_mut());

        Ok(Self {
            _strings: strings,
            pointers,
        })
    }

    pub fn len(&self) -> usize {
        self.pointers.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pointer to the array; valid while `self` is alive.
    pub fn as_ptr(&self) -> *const *const c_char {
        self.pointers.as_ptr() as *const *const c_char
    }

    /// Pointer for APIs declared with `char **` / `char *const []`.
    pub fn as_mut_ptr(&mut self) -> *mut *mut c_char {
        self.pointers.as_mut_ptr()
    }

    /// Like [`as_mut_ptr`](Self::as_mut_ptr) but NULL for an empty array.
    pub fn as_mut_ptr_or_null(&mut self) -> *mut *mut c_char {
        if self.is_empty() {
            ptr::null_mut()
        } else {
            self.as_mut_ptr()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serve(value: &str) -> impl FnMut(Option<&mut [u8]>) -> i32 + '_ {
        move |buf| write_sized_string(value, buf)
    }

    #[test]
    fn test_sized_string_roundtrip() {
        assert_eq!(read_sized_string(serve("ubuntu")), Some("ubuntu".to_string()));
    }

    #[test]
    fn test_sized_string_absent() {
        assert_eq!(read_sized_string(|_| -1), None);
        assert_eq!(read_sized_string(|_| 0), None);
    }

    #[test]
    fn test_sized_string_length_mismatch_is_absent() {
        let mut calls = 0;
        let value = read_sized_string(|buf| {
            calls += 1;
            match buf {
                None => 10,
                Some(buf) => {
                    // value shrank between the two calls
                    write_sized_string("short", Some(buf))
                }
            }
        });
        assert_eq!(calls, 2);
        assert_eq!(value, None);
    }

    #[test]
    fn test_sized_string_invalid_utf8_is_absent() {
        let value = read_sized_string(|buf| {
            if let Some(buf) = buf {
                buf[0] = 0xff;
                buf[1] = 0xfe;
                buf[2] = 0;
            }
            2
        });
        assert_eq!(value, None);
    }

    #[test]
    fn test_write_sized_string_truncates_to_buffer() {
        let mut buf = [0xaau8; 4];
        let len = write_sized_string("abcdef", Some(&mut buf));
        assert_eq!(len, 6);
        assert_eq!(&buf, b"abc\0");
    }

    #[test]
    fn test_split_lines() {
        let lines = split_lines(Some("lxc.net.0.type\nlxc.net.0.link\n\n".to_string()));
        assert_eq!(lines, vec!["lxc.net.0.type", "lxc.net.0.link"]);
        assert!(split_lines(None).is_empty());
    }

    #[test]
    fn test_cstring_array_is_null_terminated() {
        let array = CStringArray::new(&["/bin/echo", "hello"]).unwrap();
        assert_eq!(array.len(), 2);
        unsafe {
            let ptr = array.as_ptr();
            assert_eq!(from_cstr(*ptr), Some("/bin/echo".to_string()));
            assert_eq!(from_cstr(*ptr.add(1)), Some("hello".to_string()));
            assert!((*ptr.add(2)).is_null());
        }
    }

    #[test]
    fn test_empty_cstring_array_pointer_is_null() {
        let mut array = CStringArray::new::<&str>(&[]).unwrap();
        assert!(array.is_empty());
        assert!(array.as_mut_ptr_or_null().is_null());
    }

    #[test]
    fn test_interior_nul_rejected() {
        assert!(matches!(to_cstring("a\0b"), Err(Error::NulByte(_))));
        assert!(check("a\0b").is_err());
        assert!(check_all(&["ok", "bad\0"]).is_err());
    }
}
