use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/**
 * 解析后的搜索条件
 *
 * 所有条件之间为 AND 关系；同一字段可以同时出现在 `fields` 与
 * `not_fields` 中。`sources`/`hosts` 系列是 `source`/`host` 字段的派生视图，
 * 供事件仓库下推过滤使用。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Search {
    pub fragments: HashSet<String>,
    pub not_fragments: HashSet<String>,
    pub fields: HashMap<String, Vec<String>>,
    pub not_fields: HashMap<String, Vec<String>>,

    pub sources: HashSet<String>,
    pub not_sources: HashSet<String>,
    pub hosts: HashSet<String>,
    pub not_hosts: HashSet<String>,
}

impl Search {
    /// 无任何条件的搜索，匹配时间范围内的所有事件
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
            && self.not_fragments.is_empty()
            && self.fields.is_empty()
            && self.not_fields.is_empty()
    }

    /// 将 `source`/`host` 字段条件复制到下推集合
    pub(crate) fn derive_pushdown_sets(&mut self) {
        self.sources = Self::values_of(&self.fields, "source");
        self.not_sources = Self::values_of(&self.not_fields, "source");
        self.hosts = Self::values_of(&self.fields, "host");
        self.not_hosts = Self::values_of(&self.not_fields, "host");
    }

    fn values_of(map: &HashMap<String, Vec<String>>, key: &str) -> HashSet<String> {
        map.get(key)
            .map(|values| values.iter().cloned().collect())
            .unwrap_or_default()
    }
}
