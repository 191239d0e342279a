//! Text rendering utilities for human-friendly error messages.
//!
//! Provides helpers to format creation chains, bean type names,
//! and "did you mean?" hints in error output.

/// Renders a chain of bean names as a readable string.
///
/// Used for the beans currently in creation when a circular
/// reference cannot be resolved.
///
/// # Examples
/// ```
/// use sprig_support::rendering::render_chain;
///
/// let chain = vec!["orderService", "paymentGateway", "orderService"];
/// assert_eq!(render_chain(&chain), "orderService → paymentGateway → orderService");
/// ```
pub fn render_chain(chain: &[impl AsRef<str>]) -> String {
    chain
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Renders a list of bean names as `[a, b, c]`.
///
/// ```
/// use sprig_support::rendering::render_names;
///
/// assert_eq!(render_names(&["a", "b"]), "[a, b]");
/// assert_eq!(render_names(&[] as &[&str]), "[]");
/// ```
pub fn render_names(names: &[impl AsRef<str>]) -> String {
    let joined = names
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{joined}]")
}

/// Shortens a fully qualified type name for display.
///
/// ```
/// use sprig_support::rendering::shorten_type_name;
///
/// let short = shorten_type_name("my_app::services::user::UserService");
/// assert_eq!(short, "UserService");
///
/// let short = shorten_type_name("alloc::sync::Arc<dyn my_app::traits::Logger>");
/// assert_eq!(short, "Arc<dyn Logger>");
/// ```
pub fn shorten_type_name(full_name: &str) -> String {
    let mut result = String::with_capacity(full_name.len());
    let mut chars = full_name.chars().peekable();
    let mut segment = String::new();

    while let Some(ch) = chars.next() {
        match ch {
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                segment.clear();
            }
            '<' | '>' | ',' | ' ' => {
                result.push_str(&segment);
                result.push(ch);
                segment.clear();
            }
            _ => segment.push(ch),
        }
    }

    result.push_str(&segment);
    result
}

/// Suggests registered bean names close to a requested one.
///
/// Scores candidates by case-insensitive containment first, then by
/// common prefix length, then by positional character overlap (catches
/// single-letter typos like `userServise`). Returns at most
/// `max_suggestions` names, best first; ties keep the order of `available`.
pub fn suggest_similar(
    requested: &str,
    available: &[&str],
    max_suggestions: usize,
) -> Vec<String> {
    let requested_lower = requested.to_lowercase();
    if requested_lower.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(&str, usize)> = available
        .iter()
        .filter_map(|&name| {
            let name_lower = name.to_lowercase();
            if name_lower == requested_lower {
                return None;
            }

            if name_lower.contains(&requested_lower) || requested_lower.contains(&name_lower) {
                return Some((name, 100));
            }

            let prefix = name_lower
                .chars()
                .zip(requested_lower.chars())
                .take_while(|(a, b)| a == b)
                .count();
            if prefix >= 3 {
                return Some((name, 50 + prefix));
            }

            if overlap_percent(&name_lower, &requested_lower) >= 60 {
                return Some((name, 40));
            }

            None
        })
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored
        .into_iter()
        .take(max_suggestions)
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Percentage of positions where both strings carry the same character.
fn overlap_percent(a: &str, b: &str) -> usize {
    if a.len().abs_diff(b.len()) > 3 {
        return 0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 100;
    }
    let common = a.chars().zip(b.chars()).filter(|(x, y)| x == y).count();
    common * 100 / max_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_simple_chain() {
        let chain = vec!["a", "b", "c", "a"];
        assert_eq!(render_chain(&chain), "a → b → c → a");
    }

    #[test]
    fn render_empty_chain() {
        let chain: Vec<&str> = vec![];
        assert_eq!(render_chain(&chain), "");
    }

    #[test]
    fn render_name_list() {
        let names = vec![String::from("dataSource"), String::from("txManager")];
        assert_eq!(render_names(&names), "[dataSource, txManager]");
    }

    #[test]
    fn shorten_with_generics() {
        assert_eq!(
            shorten_type_name("alloc::sync::Arc<dyn my_app::traits::Logger>"),
            "Arc<dyn Logger>"
        );
        assert_eq!(shorten_type_name("String"), "String");
    }

    #[test]
    fn suggest_typo() {
        let available = vec!["userService", "userRepository", "dataSource"];
        let suggestions = suggest_similar("userServise", &available, 3);
        assert!(!suggestions.is_empty());
        assert_eq!(suggestions[0], "userService");
    }

    #[test]
    fn suggest_containment_first() {
        let available = vec!["dataSourceProperties", "dataSource"];
        let suggestions = suggest_similar("dataSourceX", &available, 1);
        assert_eq!(suggestions, vec!["dataSource".to_string()]);
    }

    #[test]
    fn suggest_no_match() {
        let available = vec!["dataSource"];
        assert!(suggest_similar("xyzAbc", &available, 3).is_empty());
    }

    #[test]
    fn suggest_skips_exact_name() {
        let available = vec!["dataSource"];
        assert!(suggest_similar("dataSource", &available, 3).is_empty());
    }
}
