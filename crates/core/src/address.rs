//! Pure queue-address helpers.
//!
//! Nothing here talks to the broker; broker-side lookups live in
//! `leaseq-infra`'s resolver.

/// Strip every trailing `/` from `value`.
pub fn trim_trailing_slash(value: &str) -> &str {
    value.trim_end_matches('/')
}

/// Whether `value` is already an absolute address (`scheme://rest`).
///
/// The scheme must start with an ASCII letter and contain only letters,
/// digits, `+`, `-` or `.`, and something must follow the `://`.
pub fn is_absolute_address(value: &str) -> bool {
    let Some((scheme, rest)) = value.split_once("://") else {
        return false;
    };

    let mut chars = scheme.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());

    starts_with_letter
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        && !rest.is_empty()
}

/// Join a URL prefix and a logical queue name: `trim(prefix) + "/" + name`.
pub fn join_prefix(prefix: &str, queue_name: &str) -> String {
    format!("{}/{}", trim_trailing_slash(prefix), queue_name)
}

/// Derive the logical queue name from an origin address.
///
/// Works for both ARNs (`arn:aws:sqs:region:account:name`) and queue URLs
/// (`https://host/account/name`): the final `:`/`/` separated segment wins.
pub fn queue_name_from_source(source_address: &str) -> &str {
    trim_trailing_slash(source_address)
        .rsplit([':', '/'])
        .next()
        .unwrap_or_default()
}
