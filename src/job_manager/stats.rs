//! 批次字段统计

use std::collections::HashMap;

use crate::models::{EventWithExtractedFields, FieldStats};

/// 统计一个批次内每个 (字段, 取值) 的出现次数
pub fn gather_event_stats(events: &[EventWithExtractedFields]) -> Vec<FieldStats> {
    count(events.iter().map(|e| &e.fields))
}

/// 同 [`gather_event_stats`]，作用于表格行
pub fn gather_row_stats(rows: &[HashMap<String, String>]) -> Vec<FieldStats> {
    count(rows.iter())
}

fn count<'a>(maps: impl Iterator<Item = &'a HashMap<String, String>>) -> Vec<FieldStats> {
    let mut occurrences: HashMap<(&str, &str), i64> = HashMap::new();
    for map in maps {
        for (key, value) in map {
            *occurrences.entry((key.as_str(), value.as_str())).or_default() += 1;
        }
    }

    occurrences
        .into_iter()
        .map(|((key, value), occurrences)| FieldStats {
            key: key.to_string(),
            value: value.to_string(),
            occurrences,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut stats: Vec<FieldStats>) -> Vec<(String, String, i64)> {
        stats.sort_by(|a, b| (&a.key, &a.value).cmp(&(&b.key, &b.value)));
        stats
            .into_iter()
            .map(|s| (s.key, s.value, s.occurrences))
            .collect()
    }

    fn row(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_counts_per_key_and_value() {
        let rows = vec![
            row(&[("level", "info"), ("host", "a")]),
            row(&[("level", "info"), ("host", "b")]),
            row(&[("level", "error")]),
        ];
        assert_eq!(
            sorted(gather_row_stats(&rows)),
            vec![
                ("host".to_string(), "a".to_string(), 1),
                ("host".to_string(), "b".to_string(), 1),
                ("level".to_string(), "error".to_string(), 1),
                ("level".to_string(), "info".to_string(), 2),
            ]
        );
    }

    #[test]
    fn test_empty_batch() {
        assert!(gather_event_stats(&[]).is_empty());
    }
}
