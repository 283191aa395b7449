use serde::{Deserialize, Serialize};

/// Provider-scoped window identifier.
pub type SourceId = u32;

/// A capturable window as reported by a [`CaptureProvider`](crate::providers::CaptureProvider).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSource {
    pub id: SourceId,
    pub name: String,
    pub owner_name: String,
}

impl WindowSource {
    pub fn new(id: SourceId, name: impl Into<String>, owner_name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            owner_name: owner_name.into(),
        }
    }

    /// "Owner - Name", or just the owner for untitled windows.
    pub fn display_title(&self) -> String {
        if self.name.is_empty() {
            self.owner_name.clone()
        } else {
            format!("{} - {}", self.owner_name, self.name)
        }
    }
}
