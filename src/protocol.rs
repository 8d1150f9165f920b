//! Line-oriented ingest protocol: command splitting and block routing.
//!
//! Commands are text lines terminated by `\n` (optionally preceded by `\r`).
//! Two reserved lines act as block delimiters: `{` opens a connection-private
//! block (nestable via a depth counter) and `}` closes one level. Everything
//! else is an opaque command token.

/// Destination for one parsed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The single server-wide batching context.
    Shared,
    /// The connection-private batching context.
    Private,
}

/// Block-open delimiter line.
pub const BLOCK_OPEN: &str = "{";

/// Block-close delimiter line.
pub const BLOCK_CLOSE: &str = "}";

/// Per-connection routing state machine.
///
/// `in_block` covers the whole span from the first unmatched `{` through and
/// including the `}` that returns the depth to zero, so both delimiter lines
/// are themselves routed to the private context.
#[derive(Debug, Default)]
pub struct BlockRouter {
    depth: usize,
    in_block: bool,
}

impl BlockRouter {
    pub fn new() -> Self {
        BlockRouter::default()
    }

    /// Route one command line and advance the state machine.
    ///
    /// The four steps run in this exact order; in particular `in_block` is
    /// only cleared after the routing decision, so the closing `}` still
    /// routes to the private context.
    pub fn route(&mut self, command: &str) -> Route {
        if command == BLOCK_OPEN {
            self.depth += 1;
            self.in_block = true;
        }

        if command == BLOCK_CLOSE && self.depth > 0 {
            self.depth -= 1;
        }

        let route = if self.in_block {
            Route::Private
        } else {
            Route::Shared
        };

        if self.depth == 0 {
            self.in_block = false;
        }

        route
    }

    /// Current nesting depth (zero outside any block).
    #[cfg(test)]
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Split a receive buffer into command tokens.
///
/// Splits the entire buffer on `\n`, drops tokens that are empty at split
/// time (consecutive terminators), then strips `\r` characters from each
/// survivor. The caller clears the buffer afterwards, so any bytes after the
/// last terminator come out as a final token in the same pass instead of
/// being retained for the next read. A token reduced to empty by `\r`
/// stripping is still returned.
pub fn split_commands(buffer: &[u8]) -> Vec<String> {
    buffer
        .split(|&b| b == b'\n')
        .filter(|token| !token.is_empty())
        .map(|token| {
            let stripped: Vec<u8> = token.iter().copied().filter(|&b| b != b'\r').collect();
            String::from_utf8_lossy(&stripped).into_owned()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routes(input: &[&str]) -> Vec<Route> {
        let mut router = BlockRouter::new();
        input.iter().map(|cmd| router.route(cmd)).collect()
    }

    #[test]
    fn plain_commands_route_to_shared() {
        assert_eq!(
            routes(&["a", "b", "c"]),
            vec![Route::Shared, Route::Shared, Route::Shared]
        );
    }

    #[test]
    fn block_delimiters_route_to_private() {
        assert_eq!(
            routes(&["{", "a", "b", "}", "c"]),
            vec![
                Route::Private,
                Route::Private,
                Route::Private,
                Route::Private,
                Route::Shared,
            ]
        );
    }

    #[test]
    fn nested_blocks_stay_private_until_outermost_close() {
        assert_eq!(
            routes(&["{", "{", "}", "}", "after"]),
            vec![
                Route::Private,
                Route::Private,
                Route::Private,
                Route::Private,
                Route::Shared,
            ]
        );
    }

    #[test]
    fn unmatched_close_is_a_depth_noop() {
        let mut router = BlockRouter::new();
        assert_eq!(router.route("}"), Route::Shared);
        assert_eq!(router.depth(), 0);
        assert_eq!(router.route("x"), Route::Shared);
    }

    #[test]
    fn close_inside_nested_block_drops_one_level() {
        let mut router = BlockRouter::new();
        router.route("{");
        router.route("{");
        assert_eq!(router.route("}"), Route::Private);
        assert_eq!(router.depth(), 1);
        assert_eq!(router.route("}"), Route::Private);
        assert_eq!(router.route("done"), Route::Shared);
    }

    #[test]
    fn split_basic_lines() {
        assert_eq!(split_commands(b"1\n2\n3\n"), vec!["1", "2", "3"]);
    }

    #[test]
    fn split_strips_carriage_returns() {
        assert_eq!(split_commands(b"a\r\nb\r\n"), vec!["a", "b"]);
    }

    #[test]
    fn split_drops_empty_tokens() {
        assert_eq!(split_commands(b"a\n\n\nb\n"), vec!["a", "b"]);
        assert_eq!(split_commands(b"\n\n"), Vec::<String>::new());
    }

    #[test]
    fn split_includes_unterminated_trailing_fragment() {
        // Trailing bytes come out as a token in the same pass; the session
        // clears the buffer afterwards, so "tail" is never re-assembled.
        assert_eq!(split_commands(b"a\nb\ntail"), vec!["a", "b", "tail"]);
    }

    #[test]
    fn split_keeps_token_emptied_by_cr_strip() {
        // "\r" is non-empty at split time so it is still fed downstream.
        assert_eq!(split_commands(b"a\n\r\n"), vec!["a", ""]);
    }
}
