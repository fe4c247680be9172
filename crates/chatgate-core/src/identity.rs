//! §3: Identity — populated by AccessGate, immutable for the request.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Public,
    Authenticated,
    Admin,
}

impl Tier {
    /// `tier >= required` ordering used by route authorization in §6.1.
    pub fn satisfies(self, required: Tier) -> bool {
        self >= required
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub org_id: String,
    pub email: Option<String>,
    pub tier: Tier,
}

impl Identity {
    pub fn public() -> Self {
        Self {
            user_id: String::new(),
            org_id: String::new(),
            email: None,
            tier: Tier::Public,
        }
    }

    /// Invariant (§3): if tier > Public then userID and orgID are non-empty.
    pub fn is_valid(&self) -> bool {
        if self.tier == Tier::Public {
            true
        } else {
            !self.user_id.is_empty() && !self.org_id.is_empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering_satisfies() {
        assert!(Tier::Admin.satisfies(Tier::Authenticated));
        assert!(Tier::Authenticated.satisfies(Tier::Authenticated));
        assert!(!Tier::Public.satisfies(Tier::Authenticated));
    }

    #[test]
    fn identity_invariant() {
        let mut id = Identity::public();
        assert!(id.is_valid());
        id.tier = Tier::Authenticated;
        assert!(!id.is_valid());
        id.user_id = "u1".into();
        id.org_id = "o1".into();
        assert!(id.is_valid());
    }
}
