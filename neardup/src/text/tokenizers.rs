/// Splits text on ASCII punctuation and whitespace, dropping empty tokens.
pub fn tokenize_text<'a>(text: &'a str) -> impl Iterator<Item = &'a str> {
    text.split(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .filter(|&x| !x.is_empty())
}

/// Lower-cases the text and collapses every run of whitespace into a single
/// space, trimming both ends.
///
/// ```
/// use neardup::text::preprocess;
///
/// assert_eq!(preprocess("  The Quick\n\tBrown   FOX "), "the quick brown fox");
/// ```
pub fn preprocess(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for token in text.split_whitespace() {
        if !result.is_empty() {
            result.push(' ');
        }
        result.extend(token.chars().flat_map(char::to_lowercase));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_text() {
        let tokens: Vec<_> = tokenize_text("Hello, world! It's-a test.").collect();
        assert_eq!(tokens, vec!["Hello", "world", "It", "s", "a", "test"]);
    }

    #[test]
    fn test_preprocess_empty() {
        assert_eq!(preprocess(""), "");
        assert_eq!(preprocess(" \n\t "), "");
    }
}
