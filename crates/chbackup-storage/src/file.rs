//! Remote object descriptor

use chrono::{DateTime, Utc};
use serde::Serialize;

/// An object or directory-like prefix returned by `stat_file` and `walk`.
///
/// Names are relative to the walked prefix. Directory entries end with `/`
/// and carry no size or modification time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFile {
    name: String,
    size: u64,
    last_modified: Option<DateTime<Utc>>,
}

impl RemoteFile {
    pub fn file(name: impl Into<String>, size: u64, last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.into(),
            size,
            last_modified,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        let mut name = name.into();
        if !name.ends_with('/') {
            name.push('/');
        }
        Self {
            name,
            size: 0,
            last_modified: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }
}
