//! Credential checks: payment authorization codes and caller identity.

use crate::model::STAFF_USER_ID;

/// Compare two strings without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Codes accepted as authorization for recording a payment.
///
/// An empty set rejects every code.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationCodes {
    codes: Vec<String>,
}

impl AuthorizationCodes {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: codes
                .into_iter()
                .map(Into::into)
                .filter(|c: &String| !c.is_empty())
                .collect(),
        }
    }

    /// Parse a comma-separated list, ignoring blanks.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(',').map(str::trim))
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Every configured code is compared, so timing does not reveal which one matched.
    pub fn verify(&self, presented: &str) -> bool {
        self.codes
            .iter()
            .fold(false, |ok, code| constant_time_eq(code, presented) | ok)
    }
}

/// Who is calling, as established by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub is_staff: bool,
}

impl Identity {
    pub fn staff() -> Self {
        Self {
            user_id: STAFF_USER_ID.to_string(),
            is_staff: true,
        }
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_staff: false,
        }
    }

    /// Staff may act on anything; other callers only on their own records.
    pub fn may_access(&self, owner: &str) -> bool {
        self.is_staff || self.user_id == owner
    }
}

/// Turns request credentials into an [`Identity`].
pub trait IdentityProvider: Send + Sync {
    /// `bearer` is the `Authorization: Bearer` token, `user_header` the
    /// gateway-supplied user id. `None` means the caller is anonymous.
    fn identify(&self, bearer: Option<&str>, user_header: Option<&str>) -> Option<Identity>;
}

/// Staff authenticate with one shared token; everyone else is identified by
/// the user id an upstream gateway has already verified.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenIdentity {
    staff_token: Option<String>,
}

impl StaticTokenIdentity {
    pub fn new(staff_token: Option<String>) -> Self {
        Self {
            staff_token: staff_token.filter(|t| !t.is_empty()),
        }
    }
}

impl IdentityProvider for StaticTokenIdentity {
    fn identify(&self, bearer: Option<&str>, user_header: Option<&str>) -> Option<Identity> {
        if let (Some(token), Some(expected)) = (bearer, &self.staff_token)
            && constant_time_eq(token, expected)
        {
            return Some(Identity::staff());
        }
        user_header
            .map(str::trim)
            .filter(|id| !id.is_empty() && *id != STAFF_USER_ID)
            .map(Identity::user)
    }
}
