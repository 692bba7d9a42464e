//! Token-budget optimization.
//!
//! Runs on ranked, deduplicated entries:
//!
//! 1. Nothing to do if the total already fits.
//! 2. Compress entries above the per-entry threshold.
//! 3. Still above 1.5x the budget: summarize the lower-ranked half.
//! 4. Greedily keep the highest-ranked entries that fit.
//!
//! The result never exceeds the budget. A plain-text top entry larger than
//! the budget is cut to fit; a structured one is kept by itself rather than
//! returning nothing.

use super::types::ContextEntry;

#[derive(Debug, Clone, Copy)]
pub struct OptimizeOptions {
    pub max_tokens: usize,
    pub compression_threshold: usize,
    pub summary_ratio: f64,
}

#[derive(Debug, Clone, Default)]
pub struct OptimizeOutcome {
    pub entries: Vec<ContextEntry>,
    pub compressed: usize,
    pub summarized: usize,
    pub dropped: usize,
}

impl OptimizeOutcome {
    pub fn compression_applied(&self) -> bool {
        self.compressed > 0 || self.summarized > 0
    }
}

pub fn total_tokens(entries: &[ContextEntry]) -> usize {
    entries.iter().map(|e| e.size_tokens).sum()
}

/// Cut `text` to at most `max_tokens` estimated tokens, preferring to end at
/// a sentence, then at a word boundary.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let max_chars = max_tokens.saturating_mul(4);
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let prefix: String = text.chars().take(max_chars).collect();
    let min_keep = prefix.len() / 2;

    if let Some(pos) = prefix.rfind(['.', '!', '?']).filter(|p| *p >= min_keep) {
        return prefix[..=pos].to_string();
    }
    if let Some(pos) = prefix.rfind(char::is_whitespace).filter(|p| *p >= min_keep) {
        return prefix[..pos].trim_end().to_string();
    }
    prefix
}

fn shrink(entry: &mut ContextEntry, max_tokens: usize) -> bool {
    if entry.size_tokens <= max_tokens {
        return false;
    }
    let text = truncate_to_tokens(&entry.text(), max_tokens);
    entry.set_text(text);
    entry.compressed = true;
    true
}

pub fn optimize(mut entries: Vec<ContextEntry>, options: OptimizeOptions) -> OptimizeOutcome {
    let budget = options.max_tokens;
    let mut outcome = OptimizeOutcome::default();

    if budget == 0 {
        outcome.dropped = entries.len();
        return outcome;
    }
    if total_tokens(&entries) <= budget {
        outcome.entries = entries;
        return outcome;
    }

    for entry in &mut entries {
        if shrink(entry, options.compression_threshold) {
            outcome.compressed += 1;
        }
    }

    if total_tokens(&entries) as f64 > budget as f64 * 1.5 {
        let half = entries.len() / 2;
        for entry in entries.iter_mut().skip(half) {
            let target = ((entry.size_tokens as f64 * options.summary_ratio).floor() as usize).max(1);
            if shrink(entry, target) {
                outcome.summarized += 1;
            }
        }
    }

    let mut used = 0;
    let mut kept = Vec::with_capacity(entries.len());
    let total = entries.len();
    let mut iter = entries.into_iter();
    if let Some(mut first) = iter.next() {
        if first.size_tokens > budget && first.content.is_string() {
            let already = first.compressed;
            if shrink(&mut first, budget) && !already {
                outcome.compressed += 1;
            }
        }
        if first.size_tokens > budget {
            // Structured content is never cut; nothing smaller may displace it.
            outcome.dropped = total - 1;
            outcome.entries = vec![first];
            return outcome;
        }
        used += first.size_tokens;
        kept.push(first);
    }
    for entry in iter {
        if used + entry.size_tokens <= budget {
            used += entry.size_tokens;
            kept.push(entry);
        }
    }

    outcome.dropped = total - kept.len();
    outcome.entries = kept;
    outcome
}
