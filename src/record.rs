// Record trait for anything kept in the durable store

use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;

/// Durability scope a record lives in.
///
/// `Sync` holds user-tunable settings that are meant to travel between machines;
/// `Local` holds timer state, session history and alarms for this machine only.
/// Each scope has its own directory and its own write lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Sync,
    Local,
}

impl Scope {
    /// Directory name under the store root
    pub fn dir_name(self) -> &'static str {
        match self {
            Scope::Sync => "sync",
            Scope::Local => "local",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// Core trait that any storable record must implement
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Unique identifier for this record within its collection
    fn id(&self) -> String;

    /// Collection name for this record type (e.g., "stats", "alarms")
    /// Determines the JSONL filename: {scope}/{collection}.jsonl
    fn collection_name() -> &'static str
    where
        Self: Sized;

    fn scope() -> Scope
    where
        Self: Sized,
    {
        Scope::Local
    }

    /// Fields to index for filtering
    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        HashMap::new()
    }
}

/// Value types that can be indexed for filtering
#[derive(Debug, Clone, PartialEq)]
pub enum IndexValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl std::fmt::Display for IndexValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexValue::String(s) => write!(f, "{}", s),
            IndexValue::Int(i) => write!(f, "{}", i),
            IndexValue::Bool(b) => write!(f, "{}", b),
        }
    }
}
