//! Which end of the connection we are.

/// Connection role.
///
/// Selects the handshake branch and the default masking policy: clients
/// mask what they send and expect unmasked frames back, servers the
/// opposite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initiates the opening handshake.
    Client,
    /// Answers the opening handshake.
    Server,
}

impl Role {
    /// `true` for [`Role::Server`].
    #[inline]
    #[must_use]
    pub const fn is_server(&self) -> bool {
        matches!(self, Role::Server)
    }

    /// Default for whether this role masks outgoing frames.
    #[inline]
    #[must_use]
    pub const fn masks_by_default(&self) -> bool {
        matches!(self, Role::Client)
    }

    /// The role at the other end.
    #[inline]
    #[must_use]
    pub const fn peer(&self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => write!(f, "Client"),
            Role::Server => write!(f, "Server"),
        }
    }
}
