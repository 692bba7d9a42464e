//! Similarity-based deduplication.

use strata_core::memory::jaccard_similarity;

use super::types::ContextEntry;

/// Drop every entry whose text is at least `threshold` similar to an
/// already-kept, higher-ranked entry. Returns the kept entries and the
/// number dropped.
///
/// Kept entries are pairwise below the threshold, so running this again on
/// its own output removes nothing.
pub fn deduplicate(entries: Vec<ContextEntry>, threshold: f64) -> (Vec<ContextEntry>, usize) {
    let mut kept: Vec<ContextEntry> = Vec::with_capacity(entries.len());
    let mut kept_text: Vec<String> = Vec::with_capacity(entries.len());
    let mut dropped = 0;

    for entry in entries {
        let text = entry.text();
        if kept_text
            .iter()
            .any(|k| jaccard_similarity(k, &text) >= threshold)
        {
            dropped += 1;
            continue;
        }
        kept_text.push(text);
        kept.push(entry);
    }

    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(texts: &[&str]) -> Vec<ContextEntry> {
        texts.iter().map(|t| ContextEntry::new("s", *t, 0.5)).collect()
    }

    #[test]
    fn test_near_duplicates_are_dropped() {
        let input = entries(&[
            "the build failed on the linker step today",
            "The build failed on the linker step today",
            "tests pass after updating the lockfile",
        ]);

        let (kept, dropped) = deduplicate(input, 0.85);
        assert_eq!(dropped, 1);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].text(), "the build failed on the linker step today");
    }

    #[test]
    fn test_higher_ranked_copy_survives() {
        let mut input = entries(&["alpha beta gamma", "alpha beta gamma"]);
        input[0].source_id = "first".into();
        input[1].source_id = "second".into();

        let (kept, _) = deduplicate(input, 0.85);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].source_id, "first");
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let input = entries(&[
            "one two three four",
            "one two three four five",
            "one two three",
            "six seven eight",
            "six seven eight nine",
            "",
            "",
        ]);
        for threshold in [0.5, 0.75, 0.85, 1.0] {
            let (once, _) = deduplicate(input.clone(), threshold);
            let (twice, dropped) = deduplicate(once.clone(), threshold);
            assert_eq!(dropped, 0, "threshold {threshold}");
            assert_eq!(once, twice);
        }
    }
}
