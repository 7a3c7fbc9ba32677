//! Request methods the server understands.

use std::fmt;

use http::Method;

/// Method of a request, as parsed from the `:method` pseudo-header.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Verb {
    Delete,
    Get,
    Head,
    Post,
    Put,
    Connect,
    Options,
    Trace,
    Patch,
}

impl Verb {
    /// Maps a wire method to a verb, `None` for a method outside the known set.
    ///
    /// Matching is exact, methods are case sensitive.
    pub fn from_bytes(src: &[u8]) -> Option<Self> {
        let verb = match src {
            b"DELETE" => Verb::Delete,
            b"GET" => Verb::Get,
            b"HEAD" => Verb::Head,
            b"POST" => Verb::Post,
            b"PUT" => Verb::Put,
            b"CONNECT" => Verb::Connect,
            b"OPTIONS" => Verb::Options,
            b"TRACE" => Verb::Trace,
            b"PATCH" => Verb::Patch,
            _ => return None,
        };
        Some(verb)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Delete => "DELETE",
            Verb::Get => "GET",
            Verb::Head => "HEAD",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Connect => "CONNECT",
            Verb::Options => "OPTIONS",
            Verb::Trace => "TRACE",
            Verb::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Verb> for Method {
    fn from(verb: Verb) -> Self {
        match verb {
            Verb::Delete => Method::DELETE,
            Verb::Get => Method::GET,
            Verb::Head => Method::HEAD,
            Verb::Post => Method::POST,
            Verb::Put => Method::PUT,
            Verb::Connect => Method::CONNECT,
            Verb::Options => Method::OPTIONS,
            Verb::Trace => Method::TRACE,
            Verb::Patch => Method::PATCH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_verbs_round_trip_through_their_names() {
        for verb in [Verb::Delete, Verb::Get, Verb::Head, Verb::Post, Verb::Put, Verb::Connect, Verb::Options, Verb::Trace, Verb::Patch] {
            assert_eq!(Verb::from_bytes(verb.as_str().as_bytes()), Some(verb));
            assert_eq!(Method::from(verb).as_str(), verb.as_str());
        }
    }

    #[test]
    fn unknown_and_lowercase_verbs_are_rejected() {
        assert_eq!(Verb::from_bytes(b"FOO"), None);
        assert_eq!(Verb::from_bytes(b"get"), None);
        assert_eq!(Verb::from_bytes(b""), None);
    }
}
