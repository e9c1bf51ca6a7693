use crate::error::{Error, Result};

const MAX_NAME_LEN: usize = 64;
const MAX_DOMAIN_LEN: usize = 253;
/// MySQL user names are limited to 32 characters.
const MAX_DB_IDENT_LEN: usize = 32;

/// Validate a site name and return it trimmed.
///
/// Names become directory names, so only ASCII letters, digits, `-` and `_`
/// are allowed, and the first character must be a letter or digit.
pub fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation("site name cannot be empty".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::Validation(format!(
            "site name '{}' is too long (max {} characters)",
            name, MAX_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::Validation(format!(
            "site name '{}' contains invalid characters",
            name
        )));
    }
    if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(Error::Validation(format!(
            "site name '{}' must start with a letter or digit",
            name
        )));
    }
    Ok(name.to_string())
}

/// Validate a hostname and return it lowercased.
pub fn validate_domain(domain: &str) -> Result<String> {
    let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return Err(Error::Validation(format!("invalid domain '{}'", domain)));
    }
    for label in domain.split('.') {
        let ok = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !ok {
            return Err(Error::Validation(format!(
                "invalid domain '{}': bad label '{}'",
                domain, label
            )));
        }
    }
    Ok(domain)
}

pub fn default_domain(name: &str) -> String {
    format!("{}.local", name.to_ascii_lowercase().replace('_', "-"))
}

/// Minimal shape check; WordPress itself validates more strictly on install.
pub fn validate_email(email: &str) -> Result<String> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, host))
            if !local.is_empty()
                && !host.is_empty()
                && !host.contains('@')
                && !email.chars().any(|c| c.is_whitespace() || c == '\'' || c == '\\') =>
        {
            Ok(email.to_string())
        }
        _ => Err(Error::Validation(format!("invalid email '{}'", email))),
    }
}

pub fn validate_admin_user(user: &str) -> Result<String> {
    let user = user.trim();
    if user.is_empty()
        || user.len() > 60
        || !user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
    {
        return Err(Error::Validation(format!("invalid admin user '{}'", user)));
    }
    Ok(user.to_string())
}

/// Database name and user for a site: `wp_<name>_<first 6 hex of id>`.
///
/// The id suffix keeps two sites named alike on a shared engine apart;
/// the name part is truncated so the whole fits MySQL's user-name limit.
pub fn database_identifier(name: &str, id: &str) -> String {
    let suffix: String = id
        .rsplit('-')
        .next()
        .unwrap_or(id)
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .take(6)
        .collect::<String>()
        .to_ascii_lowercase();
    let budget = MAX_DB_IDENT_LEN - "wp_".len() - 1 - suffix.len();
    let base: String = name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(budget)
        .collect();
    format!("wp_{}_{}", base, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_names() {
        assert_eq!(validate_name(" demo-site_2 ").unwrap(), "demo-site_2");
    }

    #[test]
    fn rejects_traversal_and_odd_characters() {
        for bad in ["", "..", "../etc", "a/b", "my site", "-flag", "_hidden", ".git", "naïve"] {
            assert!(validate_name(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(validate_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn domains_are_lowercased_hostnames() {
        assert_eq!(validate_domain("Demo.Local").unwrap(), "demo.local");
        assert_eq!(validate_domain("localhost").unwrap(), "localhost");
        assert!(validate_domain("bad_domain.local").is_err());
        assert!(validate_domain("-x.local").is_err());
        assert!(validate_domain("a..b").is_err());
        assert!(validate_domain("").is_err());
    }

    #[test]
    fn default_domain_is_valid() {
        let d = default_domain("My_Site");
        assert_eq!(d, "my-site.local");
        assert!(validate_domain(&d).is_ok());
    }

    #[test]
    fn email_shape() {
        assert!(validate_email("admin@demo.local").is_ok());
        assert!(validate_email("nope").is_err());
        assert!(validate_email("a@b@c").is_err());
        assert!(validate_email("o'hara@x.local").is_err());
    }

    #[test]
    fn database_identifier_fits_mysql_limits() {
        let id = "site-0a1b2c3d4e5f00000000000000000000";
        assert_eq!(database_identifier("Demo-Site", id), "wp_demo_site_0a1b2c");

        let long = database_identifier(&"x".repeat(64), id);
        assert_eq!(long.len(), MAX_DB_IDENT_LEN);
        assert!(long.ends_with("_0a1b2c"));
    }
}
