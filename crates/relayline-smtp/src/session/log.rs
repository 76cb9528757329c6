//! Append-only record of every reply line seen on a session.

use crate::types::Response;

/// Ordered log of all response lines received on a connection.
///
/// Only the session appends to it. The most recent final response and the
/// most recent complete reply are computed from the entries, so they can
/// never disagree with what was actually received.
#[derive(Debug, Clone, Default)]
pub struct ResponseLog {
    entries: Vec<Response>,
}

impl ResponseLog {
    pub(crate) fn push(&mut self, response: Response) {
        self.entries.push(response);
    }

    /// Returns every line received, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[Response] {
        &self.entries
    }

    /// Returns the number of lines received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been received yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the most recent final line.
    #[must_use]
    pub fn last_response(&self) -> Option<&Response> {
        self.entries.iter().rev().find(|r| r.is_final())
    }

    /// Returns all lines of the most recent complete reply.
    #[must_use]
    pub fn last_reply(&self) -> &[Response] {
        let Some(end) = self.entries.iter().rposition(Response::is_final) else {
            return &[];
        };
        let start = self.entries[..end]
            .iter()
            .rposition(Response::is_final)
            .map_or(0, |i| i + 1);
        &self.entries[start..=end]
    }

    /// Iterates over complete replies, oldest first.
    pub fn replies(&self) -> impl Iterator<Item = &[Response]> {
        self.entries
            .split_inclusive(Response::is_final)
            .filter(|reply| reply.last().is_some_and(Response::is_final))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn log(lines: &[&str]) -> ResponseLog {
        let mut log = ResponseLog::default();
        for line in lines {
            log.push(Response::parse(line).unwrap());
        }
        log
    }

    #[test]
    fn empty_log() {
        let log = ResponseLog::default();
        assert!(log.is_empty());
        assert!(log.last_response().is_none());
        assert!(log.last_reply().is_empty());
        assert_eq!(log.replies().count(), 0);
    }

    #[test]
    fn last_reply_spans_continuations() {
        let log = log(&["220 ready", "250-mx", "250-PIPELINING", "250 STARTTLS"]);
        assert_eq!(log.len(), 4);
        assert_eq!(log.last_response().unwrap().text(), "STARTTLS");

        let reply: Vec<_> = log.last_reply().iter().map(Response::text).collect();
        assert_eq!(reply, ["mx", "PIPELINING", "STARTTLS"]);
    }

    #[test]
    fn incomplete_trailing_reply_is_ignored() {
        let log = log(&["220 ready", "250-mx", "250-SIZE"]);
        assert_eq!(log.last_response().unwrap().code(), 220);
        assert_eq!(log.last_reply().len(), 1);
        assert_eq!(log.replies().count(), 1);
    }

    #[test]
    fn replies_in_order() {
        let log = log(&["220 ready", "250-mx", "250 OK", "221 bye"]);
        let codes: Vec<_> = log
            .replies()
            .map(|reply| (reply[0].code().as_u16(), reply.len()))
            .collect();
        assert_eq!(codes, [(220, 1), (250, 2), (221, 1)]);
    }
}
