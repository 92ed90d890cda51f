//! Topic name resolution for handler registration.
//!
//! A handler either names its topic explicitly or has it inferred from its
//! identifier by stripping a convention prefix (`on_` for consumers, `to_`
//! for producers). Both paths end in the same legality check so that a bad
//! name fails at registration time, before any task exists.

use std::sync::OnceLock;

use regex::Regex;

/// Default prefix stripped from consumer handler identifiers.
pub const CONSUMER_PREFIX: &str = "on_";

/// Default prefix stripped from producer handler identifiers.
pub const PRODUCER_PREFIX: &str = "to_";

/// Longest topic name a broker accepts.
pub const MAX_TOPIC_LEN: usize = 249;

/// Errors raised while resolving a topic name for a handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamingError {
    #[error("handler name '{identifier}' must start with '{prefix}' followed by a topic name")]
    MissingPrefix { identifier: String, prefix: String },
    #[error("topic name '{topic}' is invalid: {reason}")]
    InvalidTopic { topic: String, reason: &'static str },
}

fn legal_topic() -> &'static Regex {
    static LEGAL: OnceLock<Regex> = OnceLock::new();
    LEGAL.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("static regex is valid"))
}

/// Strips `prefix` from `identifier` to obtain a topic name.
///
/// The identifier must start with the prefix and be strictly longer than it.
///
/// # Errors
///
/// Returns [`NamingError::MissingPrefix`] when either condition fails, and
/// [`NamingError::InvalidTopic`] when the remainder is not a legal topic.
pub fn topic_from_identifier(identifier: &str, prefix: &str) -> Result<String, NamingError> {
    let topic = identifier
        .strip_prefix(prefix)
        .filter(|rest| !rest.is_empty())
        .ok_or_else(|| NamingError::MissingPrefix {
            identifier: identifier.to_string(),
            prefix: prefix.to_string(),
        })?;
    validate_topic(topic)?;
    Ok(topic.to_string())
}

/// Checks that `topic` is non-empty, within the length limit, and only uses
/// broker-legal characters.
///
/// # Errors
///
/// Returns [`NamingError::InvalidTopic`] describing the first violation.
pub fn validate_topic(topic: &str) -> Result<(), NamingError> {
    let reason = if topic.is_empty() {
        Some("topic must not be empty")
    } else if topic.len() > MAX_TOPIC_LEN {
        Some("topic exceeds 249 characters")
    } else if topic == "." || topic == ".." {
        Some("topic must not be '.' or '..'")
    } else if !legal_topic().is_match(topic) {
        Some("topic may only contain ASCII alphanumerics, '.', '_' and '-'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(NamingError::InvalidTopic {
            topic: topic.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Resolves the topic for a handler: the explicit name when given, otherwise
/// the identifier with `prefix` stripped.
///
/// # Errors
///
/// See [`topic_from_identifier`] and [`validate_topic`].
pub fn resolve_topic(
    explicit: Option<&str>,
    identifier: &str,
    prefix: &str,
) -> Result<String, NamingError> {
    match explicit {
        Some(topic) => {
            validate_topic(topic)?;
            Ok(topic.to_string())
        }
        None => topic_from_identifier(identifier, prefix),
    }
}

/// Returns the bare identifier of a function item, e.g. `on_orders` for
/// `my_app::handlers::on_orders`.
///
/// Closures yield `{{closure}}`, which never carries a topic prefix, so
/// closures must be registered with an explicit identifier or topic.
#[must_use]
pub fn identifier_of<F>(_handler: &F) -> &'static str {
    let full = std::any::type_name::<F>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn on_orders() {}

    #[test]
    fn strips_consumer_prefix() {
        assert_eq!(topic_from_identifier("on_orders", "on_").unwrap(), "orders");
    }

    #[test]
    fn identifier_without_prefix_is_rejected() {
        let err = topic_from_identifier("process", "on_").unwrap_err();
        assert_eq!(
            err,
            NamingError::MissingPrefix {
                identifier: "process".to_string(),
                prefix: "on_".to_string(),
            }
        );
    }

    #[test]
    fn bare_prefix_is_rejected() {
        assert!(matches!(
            topic_from_identifier("on_", "on_"),
            Err(NamingError::MissingPrefix { .. })
        ));
    }

    #[test]
    fn custom_prefix() {
        assert_eq!(
            topic_from_identifier("handle_payments", "handle_").unwrap(),
            "payments"
        );
        assert!(topic_from_identifier("on_payments", "handle_").is_err());
    }

    #[test]
    fn explicit_topic_wins_over_identifier() {
        let topic = resolve_topic(Some("billing.events"), "whatever", "on_").unwrap();
        assert_eq!(topic, "billing.events");
    }

    #[test]
    fn explicit_topic_is_validated() {
        assert!(resolve_topic(Some(""), "on_orders", "on_").is_err());
        assert!(resolve_topic(Some("bad topic"), "on_orders", "on_").is_err());
        assert!(resolve_topic(Some(".."), "on_orders", "on_").is_err());
        assert!(resolve_topic(Some(&"x".repeat(250)), "on_orders", "on_").is_err());
        assert!(resolve_topic(Some(&"x".repeat(249)), "on_orders", "on_").is_ok());
    }

    #[test]
    fn identifier_of_function_item() {
        assert_eq!(identifier_of(&on_orders), "on_orders");
    }

    #[test]
    fn identifier_of_closure_has_no_prefix() {
        let handler = |_: u32| ();
        assert!(topic_from_identifier(identifier_of(&handler), "on_").is_err());
    }

    proptest! {
        #[test]
        fn prefixed_identifiers_resolve_to_suffix(suffix in "[a-z0-9_]{1,40}") {
            let identifier = format!("on_{suffix}");
            prop_assert_eq!(topic_from_identifier(&identifier, "on_").unwrap(), suffix);
        }

        #[test]
        fn unprefixed_identifiers_fail(identifier in "[a-n][a-z0-9_]{0,20}") {
            prop_assert!(topic_from_identifier(&identifier, "to_").is_err());
        }
    }
}
