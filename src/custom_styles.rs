use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::theme::StyleMap;

#[derive(Debug, Clone, Serialize)]
pub struct CustomStyle {
    pub name: String,
    pub styles: StyleMap,
    pub updated_at: DateTime<Utc>,
}

/// In-process custom style maps keyed by name.
#[derive(Debug, Clone, Default)]
pub struct CustomStyleStore {
    inner: Arc<RwLock<HashMap<String, CustomStyle>>>,
}

impl CustomStyleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or overwrites `name`. Returns `true` when an entry was replaced.
    pub async fn save(&self, name: &str, styles: StyleMap) -> bool {
        let entry = CustomStyle {
            name: name.to_owned(),
            styles,
            updated_at: Utc::now(),
        };
        self.inner
            .write()
            .await
            .insert(name.to_owned(), entry)
            .is_some()
    }

    pub async fn get(&self, name: &str) -> Option<CustomStyle> {
        self.inner.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<CustomStyle> {
        let mut out: Vec<CustomStyle> = self.inner.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub async fn delete(&self, name: &str) -> bool {
        self.inner.write().await.remove(name).is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn styles(pairs: &[(&str, &str)]) -> StyleMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[tokio::test]
    async fn save_get_and_replace() {
        let store = CustomStyleStore::new();
        assert!(!store.save("mine", styles(&[("p", "color: red;")])).await);
        let first = store.get("mine").await.expect("stored");
        assert_eq!(first.styles["p"], "color: red;");

        assert!(store.save("mine", styles(&[("p", "color: blue;")])).await);
        let second = store.get("mine").await.expect("stored");
        assert_eq!(second.styles["p"], "color: blue;");
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn list_is_sorted_by_name() {
        let store = CustomStyleStore::new();
        for name in ["zeta", "alpha", "mid"] {
            store.save(name, StyleMap::new()).await;
        }
        let names: Vec<_> = store.list().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let store = CustomStyleStore::new();
        store.save("gone", StyleMap::new()).await;
        assert!(store.delete("gone").await);
        assert!(!store.delete("gone").await);
        assert!(store.get("gone").await.is_none());
    }

    #[tokio::test]
    async fn clones_share_entries_across_tasks() {
        let store = CustomStyleStore::new();
        let handles: Vec<_> = (0..8)
            .map(|idx| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .save(&format!("style-{idx}"), styles(&[("h1", "margin: 0;")]))
                        .await
                })
            })
            .collect();
        for handle in handles {
            assert!(!handle.await.expect("task"));
        }
        assert_eq!(store.len().await, 8);
    }
}
