//! Hierarchical subject matching.
//!
//! Subjects are dot-delimited token strings. Patterns may use `*` to match
//! exactly one token, or a trailing `>` to match one or more remaining
//! tokens (`order.>` matches `order.placed` but not `payment.authorized`).

/// Check whether a concrete subject matches a filter pattern.
pub fn matches(subject: &str, pattern: &str) -> bool {
    let mut subject_tokens = subject.split('.');
    let mut pattern_tokens = pattern.split('.').peekable();

    loop {
        match (subject_tokens.next(), pattern_tokens.next()) {
            (token, Some(">")) => {
                // `>` must be the final pattern token and requires at least
                // one subject token to consume.
                return pattern_tokens.peek().is_none() && token.is_some();
            }
            (Some(token), Some(expected)) => {
                if expected != "*" && expected != token {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Check whether every subject matched by `filter` is also matched by
/// `pattern`. Used to validate that a consumer group's filter stays within
/// its stream's subject space.
pub fn covers(pattern: &str, filter: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut pattern_tokens = pattern.split('.').peekable();

    loop {
        match (filter_tokens.next(), pattern_tokens.next()) {
            (token, Some(">")) => return pattern_tokens.peek().is_none() && token.is_some(),
            (Some(">"), Some(_)) => {
                // A wildcard filter reaches subjects the narrower pattern
                // token cannot.
                return false;
            }
            (Some(token), Some(expected)) => {
                if expected != "*" && expected != token {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}
