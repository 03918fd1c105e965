/// Associates a readiness [`Event`](crate::Event) with the [`Channel`](crate::Channel)
/// that registered it.
///
/// A `Token` is an opaque `usize` the caller picks at registration time;
/// the poller hands it back unchanged on every event for that file
/// descriptor. `EventLoop` uses the raw fd as its own token so the
/// poller's channel map (§3, "the poller's channel map is a partial
/// function") can be a direct fd -> Channel lookup.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Token(pub usize);

impl From<usize> for Token {
    fn from(val: usize) -> Token {
        Token(val)
    }
}

impl From<Token> for usize {
    fn from(val: Token) -> usize {
        val.0
    }
}
