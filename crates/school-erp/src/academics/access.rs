use axum::http::HeaderMap;
use serde::Serialize;

/// Header the upstream auth layer uses to forward the caller's role.
pub const ROLE_HEADER: &str = "x-user-role";

const MAX_ROLE_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Teacher,
    Staff,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Staff => "staff",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "staff" => Some(Role::Staff),
            _ => None,
        }
    }
}

pub const ADMIN_ONLY: &[Role] = &[Role::Admin];
pub const GRADING: &[Role] = &[Role::Admin, Role::Teacher];
pub const ANY_ROLE: &[Role] = &[Role::Admin, Role::Teacher, Role::Staff];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("missing or unrecognized x-user-role header")]
    Unauthenticated,
    #[error("role '{}' may not perform this action", .0.label())]
    Forbidden(Role),
}

/// Resolves the caller's role and checks it against `allowed`.
pub fn require_role(headers: &HeaderMap, allowed: &[Role]) -> Result<Role, AccessError> {
    let role = normalized_header_value(headers, ROLE_HEADER, MAX_ROLE_LEN)
        .as_deref()
        .and_then(Role::from_label)
        .ok_or(AccessError::Unauthenticated)?;

    if allowed.contains(&role) {
        Ok(role)
    } else {
        Err(AccessError::Forbidden(role))
    }
}

fn normalized_header_value(headers: &HeaderMap, key: &str, max_len: usize) -> Option<String> {
    let raw = headers.get(key)?.to_str().ok()?.trim();
    if raw.is_empty() || raw.len() > max_len {
        return None;
    }
    Some(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(role: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ROLE_HEADER, HeaderValue::from_str(role).expect("header value"));
        headers
    }

    #[test]
    fn roles_are_case_insensitive() {
        assert_eq!(require_role(&headers(" Admin "), ADMIN_ONLY), Ok(Role::Admin));
        assert_eq!(require_role(&headers("TEACHER"), GRADING), Ok(Role::Teacher));
    }

    #[test]
    fn missing_and_unknown_roles_are_unauthenticated() {
        assert_eq!(
            require_role(&HeaderMap::new(), ANY_ROLE),
            Err(AccessError::Unauthenticated)
        );
        assert_eq!(
            require_role(&headers("principal"), ANY_ROLE),
            Err(AccessError::Unauthenticated)
        );
    }

    #[test]
    fn disallowed_roles_are_forbidden() {
        let err = require_role(&headers("staff"), GRADING).expect_err("staff cannot grade");
        assert_eq!(err, AccessError::Forbidden(Role::Staff));
        assert_eq!(err.to_string(), "role 'staff' may not perform this action");
    }
}
