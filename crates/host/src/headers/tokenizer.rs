//! Quote-aware comma tokenizer for raw header values.
//!
//! Raw header values are stored verbatim, one array element per header line as
//! received. Consumers that want the logical values of a comma-separated
//! header go through this tokenizer, which splits on *unquoted* commas only
//! and strips the enclosing quotes from fully-quoted tokens. Tokens are never
//! trimmed of surrounding whitespace; quoted substrings round-trip byte for
//! byte.

/// Splits one raw header value on unquoted commas.
///
/// Quotes are recognized as ASCII `"` with no internal escaping. Each emitted
/// token keeps its surrounding whitespace; a token that both starts and ends
/// with a quote has those two quote characters removed.
pub fn split_quoted_commas(raw: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in raw.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => {
                values.push(unquote(std::mem::take(&mut current)));
            }
            _ => current.push(ch),
        }
    }

    values.push(unquote(current));
    values
}

/// Flattens an ordered array of raw header values into one logical sequence.
///
/// Each raw element is tokenized independently with [`split_quoted_commas`];
/// results are concatenated in source order.
pub fn normalize_values(raw_values: &[String]) -> Vec<String> {
    raw_values.iter().flat_map(|raw| split_quoted_commas(raw)).collect()
}

fn unquote(token: String) -> String {
    let bytes = token.as_bytes();
    if bytes.len() >= 2 && bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"' {
        token[1..token.len() - 1].to_owned()
    } else {
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_values_split_on_commas() {
        assert_eq!(split_quoted_commas("a,b,c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn tokens_are_not_trimmed() {
        assert_eq!(split_quoted_commas("a, b"), vec!["a", " b"]);
    }

    #[test]
    fn quoted_commas_are_preserved() {
        assert_eq!(split_quoted_commas(r#""enclosed, in double-quotes""#), vec!["enclosed, in double-quotes"]);
    }

    #[test]
    fn partially_quoted_tokens_keep_their_quotes() {
        assert_eq!(split_quoted_commas(r#"etag "abc""#), vec![r#"etag "abc""#]);
    }

    #[test]
    fn empty_tokens_are_kept() {
        assert_eq!(split_quoted_commas("a,,b"), vec!["a", "", "b"]);
    }

    #[test]
    fn raw_array_flattens_in_source_order() {
        let raw = vec![
            "simple-1".to_owned(),
            "comma-1, separated-1".to_owned(),
            r#""enclosed, in double-quotes""#.to_owned(),
            "comma-2, separated-2".to_owned(),
            "simple-2".to_owned(),
        ];

        let normalized = normalize_values(&raw);

        assert_eq!(normalized.len(), 7);
        assert_eq!(normalized[0], "simple-1");
        assert_eq!(normalized[1], "comma-1");
        assert_eq!(normalized[2], " separated-1");
        assert_eq!(normalized[3], "enclosed, in double-quotes");
        assert_eq!(normalized[4], "comma-2");
        assert_eq!(normalized[5], " separated-2");
        assert_eq!(normalized[6], "simple-2");
    }
}
