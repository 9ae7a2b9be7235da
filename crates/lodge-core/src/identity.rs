//! Authenticated identities.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An authenticated principal.
///
/// Produced by the token verifier and treated as immutable input by every
/// operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Principal id (opaque, non-empty)
    pub pid: String,
    /// Identity provider id
    pub idp: String,
    /// Human readable name
    pub display_name: String,
}

impl Identity {
    /// Creates a new identity.
    pub fn new(
        pid: impl Into<String>,
        idp: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            pid: pid.into(),
            idp: idp.into(),
            display_name: display_name.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.pid, self.idp, self.display_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display() {
        let idt = Identity::new("hugo", "localhost", "Hugo Gonzalez");
        assert_eq!(idt.to_string(), "hugo@localhost (Hugo Gonzalez)");
    }
}
