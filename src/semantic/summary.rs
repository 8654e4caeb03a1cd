//! Behavioral summary of a transaction's nearest neighbors.

use crate::semantic::service::SimilarTransaction;

const NO_NEIGHBORS: &str = "No similar transactions found.";
const NO_PATTERNS: &str = "Similar transaction patterns found.";

/// Most frequent value and its count. Ties go to the value that reached the
/// maximum count first in iteration order.
fn mode<'a>(values: impl Iterator<Item = &'a str>) -> Option<(&'a str, usize)> {
    let values: Vec<&str> = values.collect();
    let mut best: Option<(&str, usize)> = None;

    for (idx, &value) in values.iter().enumerate() {
        let count = values[..=idx].iter().filter(|v| **v == value).count();
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }

    best.map(|(value, _)| (value, values.iter().filter(|v| **v == value).count()))
}

/// Summarize a ranked neighbor set in one or more sentences.
pub fn summarize(neighbors: &[SimilarTransaction]) -> String {
    if neighbors.is_empty() {
        return NO_NEIGHBORS.to_string();
    }

    let mut parts = vec![];

    let vendors = neighbors
        .iter()
        .map(|n| n.vendor.as_str())
        .filter(|v| !v.is_empty());
    if let Some((vendor, count)) = mode(vendors) {
        if count > 1 {
            parts.push(format!("You frequently shop at {} ({} times)", vendor, count));
        }
    }

    let categories = neighbors
        .iter()
        .map(|n| n.category.as_str())
        .filter(|c| !c.is_empty());
    if let Some((category, _)) = mode(categories) {
        parts.push(format!("Most similar transactions are in {}", category));
    }

    // zero is the placeholder for a missing amount
    let amounts: Vec<f64> = neighbors
        .iter()
        .map(|n| n.amount)
        .filter(|a| *a != 0.0)
        .collect();
    if !amounts.is_empty() {
        let mean = amounts.iter().sum::<f64>() / amounts.len() as f64;
        parts.push(format!(
            "Average amount for similar transactions: ${:.2}",
            mean
        ));
    }

    if parts.is_empty() {
        NO_PATTERNS.to_string()
    } else {
        parts.join(". ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neighbor(id: i64, vendor: &str, category: &str, amount: f64) -> SimilarTransaction {
        SimilarTransaction {
            transaction_id: id,
            vendor: vendor.to_string(),
            category: category.to_string(),
            date: "2024-01-01".to_string(),
            amount,
            item_count: 1,
            document: String::new(),
            similarity_score: 0.5,
        }
    }

    #[test]
    fn test_empty_neighbors() {
        assert_eq!(summarize(&[]), "No similar transactions found.");
    }

    #[test]
    fn test_repeated_vendor_and_average() {
        let neighbors = vec![
            neighbor(1, "Costco", "groceries", 30.0),
            neighbor(2, "Walmart", "groceries", 10.0),
            neighbor(3, "Costco", "household", 20.0),
        ];
        assert_eq!(
            summarize(&neighbors),
            "You frequently shop at Costco (2 times). \
             Most similar transactions are in groceries. \
             Average amount for similar transactions: $20.00"
        );
    }

    #[test]
    fn test_single_vendor_occurrence_is_not_mentioned() {
        let neighbors = vec![
            neighbor(2, "Costco", "groceries", 34.52),
            neighbor(3, "Shell", "transportation", 45.0),
        ];
        let summary = summarize(&neighbors);

        assert!(!summary.contains("frequently"));
        assert!(summary.starts_with("Most similar transactions are in groceries"));
        assert!(summary.ends_with("$39.76"));
    }

    #[test]
    fn test_mode_tie_goes_to_first_to_reach_max() {
        let neighbors = vec![
            neighbor(1, "A", "travel", 1.0),
            neighbor(2, "B", "dining", 1.0),
            neighbor(3, "B", "dining", 1.0),
            neighbor(4, "A", "travel", 1.0),
        ];
        let summary = summarize(&neighbors);

        assert!(summary.contains("You frequently shop at B (2 times)"));
        assert!(summary.contains("Most similar transactions are in dining"));
    }

    #[test]
    fn test_no_clause_applies() {
        let neighbors = vec![neighbor(1, "", "", 0.0)];
        assert_eq!(summarize(&neighbors), "Similar transaction patterns found.");
    }

    #[test]
    fn test_zero_amounts_are_ignored() {
        let neighbors = vec![neighbor(1, "", "", 0.0), neighbor(2, "", "", 9.0)];
        assert_eq!(
            summarize(&neighbors),
            "Average amount for similar transactions: $9.00"
        );
    }
}
