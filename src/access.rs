//! Access rules
//!
//! Who may sign in (the institutional e-mail policy) and who is an admin (the allow-list)

use std::collections::HashSet;
use std::sync::Arc;

use crate::utils::normalize_text;

/// Normalize an e-mail address for comparisons and storage
pub fn normalize_email(email: &str) -> String {
    normalize_text(email).to_lowercase()
}

/// Only allow e-mail addresses of a single institutional domain
#[derive(Clone, Debug)]
pub struct EmailPolicy {
    /// Lower-cased domain, without the `@`
    domain: String,
}

impl EmailPolicy {
    /// Create the policy for a given domain, like `apsit.edu.in`
    pub fn new(domain: &str) -> Self {
        Self {
            domain: normalize_email(domain.trim_start_matches('@')),
        }
    }

    /// The message shown when an address is rejected
    pub fn rejection_message(&self) -> String {
        format!("Only @{} email addresses are allowed", self.domain)
    }

    /// Is the e-mail address part of the institutional domain?
    pub fn is_allowed(&self, email: &str) -> bool {
        let email = normalize_email(email);

        match email.rsplit_once('@') {
            Some((local, domain)) => !local.is_empty() && domain == self.domain,
            None => false,
        }
    }

    /// Check the address, returning the normalized version when allowed
    pub fn check(&self, email: &str) -> Result<String, String> {
        if self.is_allowed(email) {
            Ok(normalize_email(email))
        } else {
            Err(self.rejection_message())
        }
    }
}

/// The static list of admin e-mail addresses
///
/// Admin status is never stored, it is derived from this list every time
#[derive(Clone, Debug, Default)]
pub struct AdminAllowList {
    /// Lower-cased e-mail addresses
    emails: Arc<HashSet<String>>,
}

impl AdminAllowList {
    /// Create the allow-list from a list of addresses
    pub fn new<I, E>(emails: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: AsRef<str>,
    {
        let emails = emails
            .into_iter()
            .map(|email| normalize_email(email.as_ref()))
            .filter(|email| !email.is_empty())
            .collect::<HashSet<String>>();

        Self {
            emails: Arc::new(emails),
        }
    }

    /// Parse a comma separated list, as found in `ADMIN_EMAILS`
    pub fn from_comma_separated(value: &str) -> Self {
        Self::new(value.split(','))
    }

    /// Is the (optional) e-mail address an admin?
    pub fn is_admin(&self, email: Option<&str>) -> bool {
        email.is_some_and(|email| self.emails.contains(&normalize_email(email)))
    }

    /// All admin addresses
    pub fn emails(&self) -> impl Iterator<Item = &String> {
        self.emails.iter()
    }
}
