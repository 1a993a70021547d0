//! Message key identifying the item a stream refers to

use crate::rdm::DataType;

/// Owned message key
///
/// Only the members present on the wire are `Some`. Attributes keep their
/// raw encoded bytes together with the container type describing them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MsgKey {
    pub service_id: Option<u16>,
    pub name: Option<String>,
    pub name_type: Option<u8>,
    pub filter: Option<u32>,
    pub identifier: Option<i32>,
    pub attrib: Option<(DataType, Vec<u8>)>,
}

impl MsgKey {
    /// Key naming an item on a service
    pub fn named(service_id: u16, name: impl Into<String>) -> Self {
        Self {
            service_id: Some(service_id),
            name: Some(name.into()),
            name_type: Some(1),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: u32) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_attrib(mut self, container: DataType, bytes: Vec<u8>) -> Self {
        self.attrib = Some((container, bytes));
        self
    }

    pub fn name_str(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}
