use regex::Regex;
use std::collections::HashMap;
use tracing::warn;

use crate::models::Search;

/**
 * 将搜索片段编译为正则表达式
 *
 * 匹配大小写不敏感，片段两侧要求单词边界（行首/行尾或非单词字符）。
 * 以 `*` 开头或结尾时去掉对应一侧的边界；片段内部的 `*` 匹配任意字符序列，
 * 其余字符按字面匹配。
 */
pub fn compile_pattern(fragment: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::from("(?i)");
    if !fragment.starts_with('*') {
        pattern.push_str(r"(^|\W)");
    }
    let body: Vec<String> = fragment.split('*').map(regex::escape).collect();
    pattern.push_str(&body.join(".*"));
    if !fragment.ends_with('*') {
        pattern.push_str(r"($|\W)");
    }
    Regex::new(&pattern)
}

fn compile_all<'a>(patterns: impl IntoIterator<Item = &'a String>) -> Vec<Regex> {
    patterns
        .into_iter()
        .filter_map(|p| match compile_pattern(p) {
            Ok(rex) => Some(rex),
            Err(e) => {
                warn!(pattern = %p, error = %e, "Failed to compile search pattern, ignoring it");
                None
            }
        })
        .collect()
}

fn compile_field_values(fields: &HashMap<String, Vec<String>>) -> HashMap<String, Vec<Regex>> {
    fields
        .iter()
        .map(|(key, values)| (key.clone(), compile_all(values)))
        .collect()
}

/**
 * 搜索匹配器
 *
 * 将 [`Search`] 的全部条件预编译；所有条件之间为 AND 关系。
 */
#[derive(Debug, Clone)]
pub struct SearchMatcher {
    fragments: Vec<Regex>,
    not_fragments: Vec<Regex>,
    fields: HashMap<String, Vec<Regex>>,
    not_fields: HashMap<String, Vec<Regex>>,
}

impl SearchMatcher {
    pub fn new(search: &Search) -> Self {
        Self {
            fragments: compile_all(&search.fragments),
            not_fragments: compile_all(&search.not_fragments),
            fields: compile_field_values(&search.fields),
            not_fields: compile_field_values(&search.not_fields),
        }
    }

    /// 所有片段都出现，且没有任何排除片段出现
    pub fn matches_raw(&self, raw: &str) -> bool {
        self.fragments.iter().all(|rex| rex.is_match(raw))
            && !self.not_fragments.iter().any(|rex| rex.is_match(raw))
    }

    /**
     * 检查字段条件
     *
     * 正向条件要求字段存在且匹配任一取值；反向条件只在字段存在时生效。
     */
    pub fn matches_fields(&self, fields: &HashMap<String, String>) -> bool {
        let included = self.fields.iter().all(|(key, values)| {
            fields
                .get(key)
                .is_some_and(|value| values.iter().any(|rex| rex.is_match(value)))
        });
        let excluded = self.not_fields.iter().any(|(key, values)| {
            fields
                .get(key)
                .is_some_and(|value| values.iter().any(|rex| rex.is_match(value)))
        });
        included && !excluded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse_search;
    use rstest::rstest;

    #[rstest]
    #[case("error", "an error occurred", true)]
    #[case("error", "ERROR: disk", true)]
    #[case("error", "errors everywhere", false)]
    #[case("error*", "errors everywhere", true)]
    #[case("*ror", "terror", true)]
    #[case("*ror", "terrors", false)]
    #[case("con*ion", "lost connection again", true)]
    #[case("a.b", "a.b", true)]
    #[case("a.b", "axb", false)]
    #[case("(x)", "see (x) here", true)]
    fn test_compile_pattern(#[case] fragment: &str, #[case] input: &str, #[case] expected: bool) {
        let rex = compile_pattern(fragment).unwrap();
        assert_eq!(rex.is_match(input), expected, "{} vs {}", fragment, input);
    }

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_fragments_and_exclusions() {
        let matcher = SearchMatcher::new(&parse_search("login NOT failed").unwrap());
        assert!(matcher.matches_raw("user login ok"));
        assert!(!matcher.matches_raw("user login failed"));
        assert!(!matcher.matches_raw("user logout"));
    }

    #[test]
    fn test_positive_field_requires_presence() {
        let matcher = SearchMatcher::new(&parse_search("userid=123").unwrap());
        assert!(matcher.matches_fields(&fields(&[("userid", "123")])));
        assert!(!matcher.matches_fields(&fields(&[("userid", "456")])));
        assert!(!matcher.matches_fields(&fields(&[])));
    }

    #[test]
    fn test_negative_field_ignores_missing() {
        let matcher = SearchMatcher::new(&parse_search("level!=debug").unwrap());
        assert!(matcher.matches_fields(&fields(&[])));
        assert!(matcher.matches_fields(&fields(&[("level", "info")])));
        assert!(!matcher.matches_fields(&fields(&[("level", "debug")])));
    }

    #[test]
    fn test_all_negative_fields_are_checked() {
        let matcher = SearchMatcher::new(&parse_search("a!=1 b!=2").unwrap());
        assert!(!matcher.matches_fields(&fields(&[("b", "2")])));
        assert!(!matcher.matches_fields(&fields(&[("a", "1")])));
    }

    #[test]
    fn test_in_list_accepts_any_value() {
        let matcher = SearchMatcher::new(&parse_search("code IN (200, 204)").unwrap());
        assert!(matcher.matches_fields(&fields(&[("code", "204")])));
        assert!(!matcher.matches_fields(&fields(&[("code", "500")])));
    }
}
