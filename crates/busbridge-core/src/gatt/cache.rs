//! 特征属性缓存
//!
//! 两级映射：对象路径 → 属性名 → 属性值。
//! 远端以扁平的 name/value 交替序列下发每个路径的属性。

use log::{trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 一个特征的发现结果（扁平的 name/value 交替序列）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredCharacteristic {
    pub path: String,
    pub properties: Vec<Option<String>>,
}

impl DiscoveredCharacteristic {
    pub fn new(path: impl Into<String>, properties: Vec<Option<String>>) -> Self {
        Self {
            path: path.into(),
            properties,
        }
    }

    /// 从 (name, value) 对构造，便于测试和内存实现
    pub fn from_pairs<'a>(
        path: impl Into<String>,
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let properties = pairs
            .into_iter()
            .flat_map(|(name, value)| [Some(name.to_string()), Some(value.to_string())])
            .collect();
        Self::new(path, properties)
    }
}

#[derive(Debug, Default)]
pub struct AttributeCache {
    paths: Option<Vec<String>>,
    properties: HashMap<String, HashMap<String, String>>,
}

impl AttributeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一批发现结果
    pub fn populate(&mut self, batch: Vec<DiscoveredCharacteristic>) {
        let mut paths = Vec::with_capacity(batch.len());
        for characteristic in batch {
            self.add_properties(&characteristic.path, &characteristic.properties);
            paths.push(characteristic.path);
        }
        self.paths = Some(paths);
    }

    /// 解析扁平的 name/value 序列并合并到该路径
    ///
    /// name 为空的条目只影响自身：记录警告并跳过（连同它的 value）。
    /// value 为空或缺失时该属性视为不存在。
    pub fn add_properties(&mut self, path: &str, flat: &[Option<String>]) {
        let values = self.properties.entry(path.to_string()).or_default();

        for (index, pair) in flat.chunks(2).enumerate() {
            let Some(name) = &pair[0] else {
                warn!(
                    "Characteristic property name at index {} of {path} is null, skipping",
                    index * 2
                );
                continue;
            };
            match pair.get(1).and_then(Option::as_ref) {
                Some(value) => {
                    trace!("{path}: {name} = {value}");
                    values.insert(name.clone(), value.clone());
                }
                None => {
                    values.remove(name);
                }
            }
        }
    }

    pub fn property(&self, path: &str, name: &str) -> Option<&str> {
        self.properties
            .get(path)
            .and_then(|values| values.get(name))
            .map(String::as_str)
    }

    pub fn paths(&self) -> Option<&[String]> {
        self.paths.as_deref()
    }

    /// 丢弃某个路径下缓存的全部属性
    pub fn invalidate(&mut self, path: &str) -> bool {
        self.properties.remove(path).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(value: &str) -> Option<String> {
        Some(value.to_string())
    }

    #[test]
    fn test_populate_and_lookup() {
        let mut cache = AttributeCache::new();
        assert_eq!(cache.paths(), None);

        cache.populate(vec![
            DiscoveredCharacteristic::from_pairs("/svc/char0", [("UUID", "u0"), ("Value", "v0")]),
            DiscoveredCharacteristic::from_pairs("/svc/char1", [("UUID", "u1")]),
        ]);

        assert_eq!(cache.paths().unwrap().len(), 2);
        assert_eq!(cache.property("/svc/char0", "Value"), Some("v0"));
        assert_eq!(cache.property("/svc/char1", "Value"), None);
        assert_eq!(cache.property("/svc/missing", "UUID"), None);
    }

    #[test]
    fn test_null_name_skips_only_that_entry() {
        let mut cache = AttributeCache::new();
        cache.add_properties(
            "/p",
            &[
                s("UUID"),
                s("u"),
                None,
                s("orphan"),
                s("Description"),
                s("d"),
            ],
        );
        assert_eq!(cache.property("/p", "UUID"), Some("u"));
        assert_eq!(cache.property("/p", "Description"), Some("d"));
        assert_eq!(cache.property("/p", "orphan"), None);
    }

    #[test]
    fn test_trailing_name_and_null_value_are_absent() {
        let mut cache = AttributeCache::new();
        cache.add_properties("/p", &[s("Value"), None, s("Representation")]);
        assert_eq!(cache.property("/p", "Value"), None);
        assert_eq!(cache.property("/p", "Representation"), None);
    }

    #[test]
    fn test_invalidate_path() {
        let mut cache = AttributeCache::new();
        cache.add_properties("/p", &[s("UUID"), s("u")]);
        assert!(cache.invalidate("/p"));
        assert!(!cache.invalidate("/p"));
        assert_eq!(cache.property("/p", "UUID"), None);
    }
}
