/// Edit distance between two strings, counted in chars.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let (short, long): (Vec<char>, Vec<char>) = {
        let a: Vec<char> = s1.chars().collect();
        let b: Vec<char> = s2.chars().collect();
        if a.len() <= b.len() { (a, b) } else { (b, a) }
    };
    if short.is_empty() {
        return long.len();
    }

    // Single row over the shorter string; `diag` carries the upper-left cell.
    let mut row: Vec<usize> = (0..=short.len()).collect();
    for (i, &lc) in long.iter().enumerate() {
        let mut diag = row[0];
        row[0] = i + 1;
        for (j, &sc) in short.iter().enumerate() {
            let above = row[j + 1];
            let substitute = diag + usize::from(lc != sc);
            row[j + 1] = substitute.min(above + 1).min(row[j] + 1);
            diag = above;
        }
    }
    row[short.len()]
}

/// `1 - distance / longer_len`; two empty strings are identical.
pub fn edit_ratio(s1: &str, s2: &str) -> f32 {
    let longest = s1.chars().count().max(s2.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(s1, s2) as f32 / longest as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── levenshtein_distance ──

    #[test]
    fn merchant_typos() {
        assert_eq!(levenshtein_distance("MONOPRIX", "MONOPRIX"), 0);
        assert_eq!(levenshtein_distance("MONOPRIX", "MONOPRIXX"), 1);
        assert_eq!(levenshtein_distance("FRANPRIX", "FRNAPRIX"), 2);
        assert_eq!(levenshtein_distance("SNCF", "RATP"), 4);
    }

    #[test]
    fn empty_side_costs_the_other_length() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("", "EDF"), 3);
        assert_eq!(levenshtein_distance("EDF", ""), 3);
    }

    #[test]
    fn argument_order_does_not_matter() {
        assert_eq!(levenshtein_distance("KITTEN", "SITTING"), 3);
        assert_eq!(levenshtein_distance("SITTING", "KITTEN"), 3);
    }

    #[test]
    fn accented_chars_count_once() {
        assert_eq!(levenshtein_distance("PÂTISSERIE", "PATISSERIE"), 1);
    }

    // ── edit_ratio ──

    #[test]
    fn ratio_bounds() {
        assert_eq!(edit_ratio("", ""), 1.0);
        assert_eq!(edit_ratio("EDF", ""), 0.0);
        assert!((edit_ratio("POKAWA", "POKAWE") - 5.0 / 6.0).abs() < 1e-6);
    }
}
