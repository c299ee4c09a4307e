//! HTTP request methods understood by the router.

use std::fmt;
use std::str::FromStr;

/// Closed set of routable HTTP verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpVerb {
    /// All verbs, in declaration order.
    pub const ALL: [HttpVerb; 4] = [
        HttpVerb::Get,
        HttpVerb::Post,
        HttpVerb::Put,
        HttpVerb::Delete,
    ];

    /// Wire representation of the verb.
    pub const fn as_str(self) -> &'static str {
        match self {
            HttpVerb::Get => "GET",
            HttpVerb::Post => "POST",
            HttpVerb::Put => "PUT",
            HttpVerb::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A method token outside the supported verb set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerbError(pub String);

impl fmt::Display for VerbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is not a valid verb", self.0)
    }
}

impl std::error::Error for VerbError {}

impl FromStr for HttpVerb {
    type Err = VerbError;

    /// Methods are case-sensitive on the wire, so `get` is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HttpVerb::ALL
            .into_iter()
            .find(|verb| verb.as_str() == s)
            .ok_or_else(|| VerbError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_verbs() {
        for verb in HttpVerb::ALL {
            assert_eq!(verb.as_str().parse::<HttpVerb>(), Ok(verb));
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(HttpVerb::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_unknown_verb() {
        let err = "PATCH".parse::<HttpVerb>().unwrap_err();
        assert_eq!(err, VerbError("PATCH".to_string()));
        assert_eq!(err.to_string(), "'PATCH' is not a valid verb");
    }

    #[test]
    fn test_case_sensitive() {
        assert!("get".parse::<HttpVerb>().is_err());
    }
}
