//! Normalized option shape shared by list endpoints
//!
//! Direct callers read `id` / `name`; recipe-style field pickers read
//! `value` / `title`. Both pairs are always populated and always equal.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub id: String,
    pub name: String,
    pub title: String,
    pub value: String,
}

impl SelectOption {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        let name = name.into();
        Self {
            title: name.clone(),
            value: id.clone(),
            id,
            name,
        }
    }
}
