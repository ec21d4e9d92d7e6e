//! Pluggable resolvers for `ip_based` and `ua_based` conditions. The SDK ships no geo-IP database
//! or user-agent parser; host applications plug their own.
use std::sync::Arc;

/// Resolve a country code from an IP address.
pub trait IpCountryLookup: Send + Sync {
    fn lookup_country(&self, ip: &str) -> Option<String>;
}

impl<T: Fn(&str) -> Option<String> + Send + Sync> IpCountryLookup for T {
    fn lookup_country(&self, ip: &str) -> Option<String> {
        self(ip)
    }
}

/// Parse a user-agent string.
pub trait UserAgentParser: Send + Sync {
    fn parse(&self, user_agent: &str) -> Option<ParsedUserAgent>;
}

impl<T: Fn(&str) -> Option<ParsedUserAgent> + Send + Sync> UserAgentParser for T {
    fn parse(&self, user_agent: &str) -> Option<ParsedUserAgent> {
        self(user_agent)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedUserAgent {
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub browser_name: Option<String>,
    pub browser_version: Option<String>,
}

impl ParsedUserAgent {
    pub(crate) fn field(&self, field: &str) -> Option<&str> {
        match field.to_lowercase().as_str() {
            "os_name" | "osname" => self.os_name.as_deref(),
            "os_version" | "osversion" => self.os_version.as_deref(),
            "browser_name" | "browsername" => self.browser_name.as_deref(),
            "browser_version" | "browserversion" => self.browser_version.as_deref(),
            _ => None,
        }
    }
}

#[derive(Clone, Default)]
pub struct FieldResolvers {
    pub ip_country: Option<Arc<dyn IpCountryLookup>>,
    pub user_agent: Option<Arc<dyn UserAgentParser>>,
}

impl std::fmt::Debug for FieldResolvers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldResolvers")
            .field("ip_country", &self.ip_country.is_some())
            .field("user_agent", &self.user_agent.is_some())
            .finish()
    }
}
