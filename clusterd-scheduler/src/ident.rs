//! Task identifier generation

use uuid::Uuid;

/// Source of process-wide unique task identifiers
pub trait TaskIdentSource: Send + Sync {
    fn next_ident(&self) -> String;
}

/// Random v4 UUID identifiers
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdentSource;

impl TaskIdentSource for UuidIdentSource {
    fn next_ident(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
