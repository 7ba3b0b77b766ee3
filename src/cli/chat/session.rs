use std::fmt;

use uuid::Uuid;

/// Opaque per-conversation identifier sent with every query.
///
/// The backend correlates turns by this value. Nothing on the client side
/// should look inside it; it is only compared and sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of fresh session tokens.
pub trait IdentityGenerator: Send {
    fn generate(&mut self) -> SessionToken;
}

/// Random v4 UUIDs.
#[derive(Debug, Default)]
pub struct UuidIdentity;

impl IdentityGenerator for UuidIdentity {
    fn generate(&mut self) -> SessionToken {
        SessionToken::new(Uuid::new_v4().hyphenated().to_string())
    }
}

/// Deterministic `prefix-1`, `prefix-2`, ... tokens.
#[cfg(test)]
#[derive(Debug)]
pub struct SequentialIdentity {
    prefix: &'static str,
    next: u32,
}

#[cfg(test)]
impl SequentialIdentity {
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix, next: 1 }
    }
}

#[cfg(test)]
impl IdentityGenerator for SequentialIdentity {
    fn generate(&mut self) -> SessionToken {
        let token = SessionToken::new(format!("{}-{}", self.prefix, self.next));
        self.next += 1;
        token
    }
}
