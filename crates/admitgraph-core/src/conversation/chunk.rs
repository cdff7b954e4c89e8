//! Splitting a finished reply into paced fragments

/// Group the space-separated words of `text` into fragments of
/// `words_per_fragment` words, each ending with a single space
///
/// Words are split on `' '` only, so newlines and runs of spaces survive
/// inside the fragments and concatenating them yields `text` plus one
/// trailing space. The last fragment may hold fewer words. Empty text
/// yields no fragments.
pub fn chunk_words(text: &str, words_per_fragment: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let size = words_per_fragment.max(1);
    let words: Vec<&str> = text.split(' ').collect();

    words
        .chunks(size)
        .map(|group| {
            let mut fragment = group.join(" ");
            fragment.push(' ');
            fragment
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_reconstruct_text() {
        let text = "The admit rate field reports the share of applicants who received an \
                    offer of admission in the reporting year for each institution listed";
        let fragments = chunk_words(text, 10);
        let joined: String = fragments.concat();

        assert_eq!(joined.trim_end(), text);
        assert_eq!(joined.len(), text.len() + 1);
        assert!(fragments.iter().all(|f| f.ends_with(' ')));
    }

    #[test]
    fn test_fixed_group_size_with_short_tail() {
        let text = (1..=23).map(|n| n.to_string()).collect::<Vec<_>>().join(" ");
        let fragments = chunk_words(&text, 10);

        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].split_whitespace().count(), 10);
        assert_eq!(fragments[1].split_whitespace().count(), 10);
        assert_eq!(fragments[2], "21 22 23 ");
    }

    #[test]
    fn test_single_spaced_text_is_exact() {
        let text = "one two three four five";
        assert_eq!(chunk_words(text, 2).concat().trim_end(), text);
    }

    #[test]
    fn test_line_breaks_and_double_spaces_are_kept() {
        let text = "Top fields:\n\n- admit_rate\n- unit_id  (key)\n\nSee  docs.";
        let fragments = chunk_words(text, 3);

        assert_eq!(fragments.concat(), format!("{text} "));
        assert_eq!(fragments[0], "Top fields:\n\n- admit_rate\n- ");
    }

    #[test]
    fn test_empty_text_has_no_fragments() {
        assert!(chunk_words("", 10).is_empty());
    }

    #[test]
    fn test_whitespace_only_text_is_preserved() {
        assert_eq!(chunk_words(" \n\t", 10).concat(), " \n\t ");
    }

    #[test]
    fn test_zero_size_treated_as_one() {
        assert_eq!(chunk_words("a b", 0), vec!["a ", "b "]);
    }
}
