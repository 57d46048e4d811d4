use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Entry kind of a [`DiffItem`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// What a patch does to one node of the tree.
///
/// `Delta` is the only action that recurses (directories only). `Bsdiff`
/// and `Zipdelta` apply to files only; a directory carrying either is a
/// protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchAction {
    Unchanged,
    Add,
    Remove,
    Delta,
    Bsdiff,
    Zipdelta,
}

/// Patch envelope embedded in every patch archive
/// (`.bireus/info.json` inside the tar).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffHead {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    pub protocol: u32,
    pub base_version: String,
    pub target_version: String,
    pub items: Vec<DiffItem>,
}

impl DiffHead {
    /// The envelope carries exactly one item: the root of the tree.
    pub fn root_item(&self) -> Result<&DiffItem, Error> {
        match self.items.as_slice() {
            [root] => Ok(root),
            items => Err(Error::ProtocolMismatch(format!(
                "patch head must contain exactly one root item, found {}",
                items.len()
            ))),
        }
    }
}

/// One node of the recursive patch tree.
///
/// CRCs are present only when the action verifies byte content (`bsdiff`);
/// children only on directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffItem {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_crc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_crc: Option<String>,
    pub action: PatchAction,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<DiffItem>,
}

impl DiffItem {
    pub fn file(name: &str, action: PatchAction) -> Self {
        Self {
            name: name.to_string(),
            kind: EntryKind::File,
            base_crc: None,
            target_crc: None,
            action,
            items: Vec::new(),
        }
    }

    pub fn directory(name: &str, action: PatchAction, items: Vec<DiffItem>) -> Self {
        Self {
            name: name.to_string(),
            kind: EntryKind::Directory,
            base_crc: None,
            target_crc: None,
            action,
            items,
        }
    }
}
