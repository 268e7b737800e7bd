//! Datasource text encodings.

use std::fmt;

use encoding_rs::{Encoding, UTF_8};

use crate::error::{FolioError, Result};

/// The charset a datasource's raw text is decoded with.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Charset(&'static Encoding);

impl Charset {
    /// Resolve a WHATWG encoding label such as `utf-8`, `latin1` or `windows-1252`.
    pub fn for_label(label: &str) -> Result<Self> {
        Encoding::for_label(label.trim().as_bytes())
            .map(Charset)
            .ok_or_else(|| {
                FolioError::InvalidParameters(format!("unknown text encoding '{}'", label))
            })
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Decode bytes, replacing malformed sequences with U+FFFD.
    pub fn decode(&self, bytes: &[u8]) -> String {
        let (text, _, _) = self.0.decode(bytes);
        text.into_owned()
    }
}

impl Default for Charset {
    fn default() -> Self {
        Charset(UTF_8)
    }
}

impl fmt::Debug for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Charset({})", self.name())
    }
}
