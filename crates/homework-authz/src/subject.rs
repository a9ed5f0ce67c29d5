/// Prefix applied to role names to form policy subjects.
pub const ROLE_SUBJECT_PREFIX: &str = "role_";

pub fn role_subject(role_name: &str) -> String {
    format!("{ROLE_SUBJECT_PREFIX}{role_name}")
}

/// Inverse of [`role_subject`]; `None` for subjects that are not role subjects.
pub fn role_name_from_subject(subject: &str) -> Option<&str> {
    subject.strip_prefix(ROLE_SUBJECT_PREFIX)
}

pub fn tenant_domain(tenant_id: i64) -> String {
    tenant_id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_round_trips_role_name() {
        let subject = role_subject("ops");
        assert_eq!(subject, "role_ops");
        assert_eq!(role_name_from_subject(&subject), Some("ops"));
    }

    #[test]
    fn non_role_subjects_are_rejected() {
        assert_eq!(role_name_from_subject("user_alice"), None);
    }

    #[test]
    fn domain_is_decimal_tenant_id() {
        assert_eq!(tenant_domain(1), "1");
        assert_eq!(tenant_domain(42), "42");
    }
}
