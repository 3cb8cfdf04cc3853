use std::collections::HashMap;

/// Line-level difference between two texts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineDiff {
    pub added: usize,
    pub removed: usize,
    pub total: usize,
}

impl LineDiff {
    /// Compares the multisets of trimmed, non-empty lines
    pub fn between(old: &str, new: &str) -> Self {
        let mut counts: HashMap<&str, isize> = HashMap::new();
        let mut total = 0;

        for line in lines(old) {
            *counts.entry(line).or_insert(0) += 1;
            total += 1;
        }
        for line in lines(new) {
            *counts.entry(line).or_insert(0) -= 1;
            total += 1;
        }

        let (mut added, mut removed) = (0, 0);
        for count in counts.values() {
            if *count > 0 {
                removed += *count as usize;
            } else {
                added += count.unsigned_abs();
            }
        }

        Self {
            added,
            removed,
            total,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }

    /// Differing lines over all lines, as a percentage
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        ((self.added + self.removed) as f64 / self.total as f64 * 100.0).clamp(0.0, 100.0)
    }

    pub fn summary(&self) -> String {
        format!("+{} -{} lines", self.added, self.removed)
    }
}

fn lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|line| !line.is_empty())
}
