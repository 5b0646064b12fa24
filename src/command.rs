//! Command definitions
//!
//! The three engine operations as values, for callers that route requests
//! (for example a network front end) instead of calling the engine directly.

/// A single engine operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Get a value by key
    Get { key: Vec<u8> },

    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },
}

impl Command {
    /// Key the command targets
    pub fn key(&self) -> &[u8] {
        match self {
            Command::Get { key } | Command::Put { key, .. } | Command::Delete { key } => key,
        }
    }

    /// Whether the command appends to the log
    pub fn is_write(&self) -> bool {
        !matches!(self, Command::Get { .. })
    }
}
