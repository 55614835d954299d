//! Text rendering utilities for human-friendly messages.
//!
//! Container errors and diagnostic descriptions name types a lot. Raw
//! `std::any::type_name` output is long (`my_app::infra::db::SqlUserRepository`),
//! so everything user-facing goes through these helpers.

/// Renders a dependency chain as a readable string.
///
/// # Examples
/// ```
/// use graft_support::rendering::render_chain;
///
/// let chain = vec!["OrderService", "Mailer", "OrderService"];
/// assert_eq!(render_chain(&chain), "OrderService → Mailer → OrderService");
/// ```
pub fn render_chain(chain: &[impl AsRef<str>]) -> String {
    chain
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Shortens a fully qualified type name for display.
///
/// Every path segment keeps only its last component; generic arguments
/// and trait objects are shortened recursively.
///
/// ```
/// use graft_support::rendering::shorten_type_name;
///
/// assert_eq!(shorten_type_name("shop::billing::InvoiceService"), "InvoiceService");
/// assert_eq!(
///     shorten_type_name("graft_container::collection::Collection<dyn shop::Plugin>"),
///     "Collection<dyn Plugin>"
/// );
/// ```
pub fn shorten_type_name(full_name: &str) -> String {
    let mut result = String::with_capacity(full_name.len());
    let mut chars = full_name.chars().peekable();
    let mut current_segment = String::new();

    while let Some(ch) = chars.next() {
        match ch {
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                current_segment.clear();
            }
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&' => {
                result.push_str(&current_segment);
                result.push(ch);
                current_segment.clear();
            }
            _ => current_segment.push(ch),
        }
    }

    result.push_str(&current_segment);
    result
}

/// Joins names into a readable list: `A`, `A and B`, `A, B and C`.
///
/// ```
/// use graft_support::rendering::format_list;
///
/// assert_eq!(format_list(&["Singleton"]), "Singleton");
/// assert_eq!(format_list(&["Scoped", "Transient"]), "Scoped and Transient");
/// ```
pub fn format_list(items: &[impl AsRef<str>]) -> String {
    match items {
        [] => String::new(),
        [only] => only.as_ref().to_string(),
        [init @ .., last] => {
            let head: Vec<&str> = init.iter().map(|s| s.as_ref()).collect();
            format!("{} and {}", head.join(", "), last.as_ref())
        }
    }
}

/// Generates "did you mean?" suggestions based on registered type names.
///
/// Compares the requested type name against available names and returns at
/// most `max_suggestions` close matches, best first.
pub fn suggest_similar(requested: &str, available: &[&str], max_suggestions: usize) -> Vec<String> {
    let requested_lower = requested.to_lowercase();
    let requested_short = shorten_type_name(requested).to_lowercase();

    let mut scored: Vec<(&str, usize)> = available
        .iter()
        .filter_map(|&name| {
            if name == requested {
                return None;
            }

            let name_lower = name.to_lowercase();
            let name_short = shorten_type_name(name).to_lowercase();

            if name_lower.contains(&requested_lower) || requested_lower.contains(&name_lower) {
                return Some((name, 100));
            }

            if name_short.contains(&requested_short) || requested_short.contains(&name_short) {
                return Some((name, 80));
            }

            let common = name_short
                .chars()
                .zip(requested_short.chars())
                .take_while(|(a, b)| a == b)
                .count();

            if common >= 3 {
                return Some((name, common * 10));
            }

            None
        })
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    scored
        .into_iter()
        .take(max_suggestions)
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Returns `true` for primitive and string types, which can never be
/// auto-wired and must be registered as instances or produced by a factory.
pub fn is_primitive_type_name(type_name: &str) -> bool {
    matches!(
        type_name,
        "bool"
            | "char"
            | "str"
            | "alloc::string::String"
            | "i8"
            | "i16"
            | "i32"
            | "i64"
            | "i128"
            | "isize"
            | "u8"
            | "u16"
            | "u32"
            | "u64"
            | "u128"
            | "usize"
            | "f32"
            | "f64"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_simple_chain() {
        let chain = vec!["A", "B", "C", "A"];
        assert_eq!(render_chain(&chain), "A → B → C → A");
    }

    #[test]
    fn render_self_cycle() {
        let chain = vec!["A", "A"];
        assert_eq!(render_chain(&chain), "A → A");
    }

    #[test]
    fn render_empty_chain() {
        let chain: Vec<&str> = vec![];
        assert_eq!(render_chain(&chain), "");
    }

    #[test]
    fn shorten_simple_path() {
        assert_eq!(shorten_type_name("my_app::services::UserService"), "UserService");
    }

    #[test]
    fn shorten_with_generics() {
        assert_eq!(
            shorten_type_name("alloc::sync::Arc<dyn my_app::traits::Logger>"),
            "Arc<dyn Logger>"
        );
        assert_eq!(
            shorten_type_name("app::Handler<app::cmd::Ship, app::cmd::Bill>"),
            "Handler<Ship, Bill>"
        );
    }

    #[test]
    fn shorten_no_path() {
        assert_eq!(shorten_type_name("String"), "String");
    }

    #[test]
    fn list_formatting() {
        let empty: [&str; 0] = [];
        assert_eq!(format_list(&empty), "");
        assert_eq!(format_list(&["A", "B", "C"]), "A, B and C");
    }

    #[test]
    fn suggest_similar_types() {
        let available = vec![
            "my_app::UserService",
            "my_app::UserRepository",
            "my_app::Logger",
            "my_app::Database",
        ];

        let suggestions = suggest_similar("UserServise", &available, 3);
        assert!(!suggestions.is_empty());
        assert!(suggestions[0].contains("UserService"));
    }

    #[test]
    fn suggest_skips_exact_match() {
        let available = vec!["my_app::Database"];
        assert!(suggest_similar("my_app::Database", &available, 3).is_empty());
    }

    #[test]
    fn suggest_no_match() {
        let available = vec!["my_app::Database"];
        assert!(suggest_similar("XyzAbcDef", &available, 3).is_empty());
    }

    #[test]
    fn primitives_are_detected() {
        assert!(is_primitive_type_name("alloc::string::String"));
        assert!(is_primitive_type_name("u32"));
        assert!(!is_primitive_type_name("my_app::Config"));
    }
}
