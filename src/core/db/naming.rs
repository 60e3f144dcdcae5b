/// Accessor-name conversion between `snake_case` columns and the `PascalCase`
/// / `camelCase` names callers use with `Record::get_named`.
use once_cell::sync::Lazy;
use regex::Regex;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z][a-z0-9]+").expect("word pattern is valid"));

/// `FooBar` and `fooBar` become `foo_bar`.
///
/// Only capitalized words are split out, so runs of capitals (`ID`) stay
/// attached to the preceding text.
pub fn to_snake_case(name: &str) -> String {
    let snake = WORD.replace_all(name, |caps: &regex::Captures| format!("_{}", caps[0].to_lowercase()));
    snake.trim_start_matches('_').to_string()
}

/// `foo_bar` becomes `FooBar`.
pub fn to_pascal_case(column: &str) -> String {
    column
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// `foo_bar` becomes `fooBar`.
pub fn to_camel_case(column: &str) -> String {
    let pascal = to_pascal_case(column);
    let mut chars = pascal.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => pascal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("FooBar"), "foo_bar");
        assert_eq!(to_snake_case("fooBar"), "foo_bar");
        assert_eq!(to_snake_case("Name"), "name");
        assert_eq!(to_snake_case("Address2Line"), "address2_line");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn test_pascal_and_camel_case() {
        assert_eq!(to_pascal_case("foo_bar"), "FooBar");
        assert_eq!(to_pascal_case("id"), "Id");
        assert_eq!(to_camel_case("created_at"), "createdAt");
        assert_eq!(to_snake_case(&to_pascal_case("user_group_id")), "user_group_id");
    }
}
