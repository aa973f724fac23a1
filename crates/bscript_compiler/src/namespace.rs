//! Maps qualified type names to the nodes that declare them.
//!
//! Namespaces are keyed by their full `a:b` path; the parent of a namespace
//! is its path minus the last segment, so walking outward needs no back
//! pointers. Entries hold [`Weak`] references: nodes are owned by the
//! session, not by the index.

use std::sync::{Arc, Weak};

use bscript_ast::name::SEPARATOR;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("type '{qualified}' is already declared by another module")]
    Duplicate { qualified: String },
}

impl RegisterError {
    /// The qualified name that was already taken.
    pub fn qualified(&self) -> &str {
        match self {
            RegisterError::Duplicate { qualified } => qualified,
        }
    }
}

/// A successful [`NamespaceIndex::find`].
#[derive(Debug)]
pub struct NamespaceHit<N> {
    pub node: Arc<N>,
    /// Path of the namespace the type was found in.
    pub namespace: String,
    pub type_name: String,
    /// Set when the looked-up path ran one segment past the type.
    pub member: Option<String>,
}

pub struct NamespaceIndex<N> {
    namespaces: DashMap<String, DashMap<String, Weak<N>>>,
}

impl<N> NamespaceIndex<N> {
    pub fn new() -> Self {
        Self {
            namespaces: DashMap::new(),
        }
    }

    /// Register `node` as the declarer of `namespace:name`.
    ///
    /// Registering the same node twice is a no-op. An entry whose node has
    /// been released is replaced.
    pub fn register(&self, namespace: &str, name: &str, node: &Arc<N>) -> Result<(), RegisterError> {
        let objects = self.namespaces.entry(namespace.to_string()).or_default();
        let outcome = match objects.entry(name.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(Arc::downgrade(node));
                Ok(())
            }
            Entry::Occupied(mut slot) => match slot.get().upgrade() {
                Some(existing) if Arc::ptr_eq(&existing, node) => Ok(()),
                Some(_) => Err(RegisterError::Duplicate {
                    qualified: qualify(namespace, name),
                }),
                None => {
                    slot.insert(Arc::downgrade(node));
                    Ok(())
                }
            },
        };
        outcome
    }

    /// Register a batch of `(name, node)` pairs under one namespace. Returns
    /// the registrations that were rejected, paired with their nodes.
    pub fn register_contents<I>(&self, namespace: &str, contents: I) -> Vec<(Arc<N>, RegisterError)>
    where
        I: IntoIterator<Item = (String, Arc<N>)>,
    {
        contents
            .into_iter()
            .filter_map(|(name, node)| match self.register(namespace, &name, &node) {
                Ok(()) => None,
                Err(error) => Some((node, error)),
            })
            .collect()
    }

    /// The node registered for exactly `namespace:name`.
    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<N>> {
        self.namespaces.get(namespace)?.get(name)?.upgrade()
    }

    /// Resolve a `:`-separated `path` as seen from the namespace `base`.
    ///
    /// Scopes are tried from `base` outward to the root; the innermost scope
    /// wins. In each scope the path is first taken as a type name, then as a
    /// type name followed by one member segment.
    pub fn find(&self, base: &[String], path: &str) -> Option<NamespaceHit<N>> {
        let segments: Vec<&str> = path.split(SEPARATOR).collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            return None;
        }
        for depth in (0..=base.len()).rev() {
            let scope = &base[..depth];
            if let Some((name, inner)) = segments.split_last() {
                if let Some(hit) = self.lookup(scope, inner, name, None) {
                    return Some(hit);
                }
            }
            if let Some((member, rest)) = segments.split_last() {
                if let Some((name, inner)) = rest.split_last() {
                    if let Some(hit) = self.lookup(scope, inner, name, Some(member)) {
                        return Some(hit);
                    }
                }
            }
        }
        None
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.namespaces
            .iter()
            .map(|objects| objects.iter().filter(|entry| entry.value().strong_count() > 0).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, scope: &[String], inner: &[&str], name: &str, member: Option<&str>) -> Option<NamespaceHit<N>> {
        let namespace = scope
            .iter()
            .map(String::as_str)
            .chain(inner.iter().copied())
            .collect::<Vec<_>>()
            .join(":");
        let node = self.get(&namespace, name)?;
        Some(NamespaceHit {
            node,
            namespace,
            type_name: name.to_string(),
            member: member.map(str::to_string),
        })
    }
}

impl<N> Default for NamespaceIndex<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> std::fmt::Debug for NamespaceIndex<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceIndex")
            .field("namespaces", &self.namespaces.len())
            .field("types", &self.len())
            .finish()
    }
}

fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", namespace, SEPARATOR, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(path: &str) -> Vec<String> {
        path.split(':').filter(|s| !s.is_empty()).map(String::from).collect()
    }

    fn node(label: &str) -> Arc<String> {
        Arc::new(label.to_string())
    }

    #[test]
    fn test_find_walks_outward() {
        let index = NamespaceIndex::new();
        let outer = node("outer Vec2");
        let inner = node("inner Vec2");
        index.register("", "Vec2", &outer).unwrap();
        index.register("geo:shapes", "Vec2", &inner).unwrap();

        let hit = index.find(&ns("geo:shapes"), "Vec2").unwrap();
        assert!(Arc::ptr_eq(&hit.node, &inner));
        let hit = index.find(&ns("geo"), "Vec2").unwrap();
        assert!(Arc::ptr_eq(&hit.node, &outer));
        assert_eq!(hit.namespace, "");
    }

    #[test]
    fn test_find_partially_qualified() {
        let index = NamespaceIndex::new();
        let color = node("Color");
        index.register("gfx:paint", "Color", &color).unwrap();

        assert!(index.find(&ns("gfx"), "paint:Color").is_some());
        assert!(index.find(&ns("gfx:paint"), "Color").is_some());
        assert!(index.find(&ns(""), "gfx:paint:Color").is_some());
        assert!(index.find(&ns("app"), "Color").is_none());
    }

    #[test]
    fn test_find_member_one_past_type() {
        let index = NamespaceIndex::new();
        let color = node("Color");
        index.register("gfx", "Color", &color).unwrap();

        let hit = index.find(&ns("gfx"), "Color:Red").unwrap();
        assert_eq!(hit.type_name, "Color");
        assert_eq!(hit.member.as_deref(), Some("Red"));
        let hit = index.find(&ns(""), "gfx:Color:Red").unwrap();
        assert_eq!(hit.member.as_deref(), Some("Red"));
        // Two segments past a type is not a member reference.
        assert!(index.find(&ns(""), "gfx:Color:Red:Dark").is_none());
        assert!(index.find(&ns(""), "gfx::Color").is_none());
    }

    #[test]
    fn test_duplicate_registration() {
        let index = NamespaceIndex::new();
        let first = node("first");
        let second = node("second");
        index.register("a", "T", &first).unwrap();
        index.register("a", "T", &first).unwrap();
        assert_eq!(
            index.register("a", "T", &second),
            Err(RegisterError::Duplicate { qualified: "a:T".into() })
        );
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_released_entry_is_replaced() {
        let index = NamespaceIndex::new();
        let first = node("first");
        index.register("", "T", &first).unwrap();
        drop(first);
        assert!(index.get("", "T").is_none());
        assert!(index.is_empty());

        let second = node("second");
        index.register("", "T", &second).unwrap();
        assert!(Arc::ptr_eq(&index.get("", "T").unwrap(), &second));
    }

    #[test]
    fn test_register_contents_reports_rejections() {
        let index = NamespaceIndex::new();
        let taken = node("taken");
        index.register("lib", "A", &taken).unwrap();

        let a = node("a");
        let b = node("b");
        let rejected = index.register_contents("lib", vec![("A".to_string(), a.clone()), ("B".to_string(), b.clone())]);
        assert_eq!(rejected.len(), 1);
        assert!(Arc::ptr_eq(&rejected[0].0, &a));
        assert!(Arc::ptr_eq(&index.get("lib", "B").unwrap(), &b));
    }

    #[test]
    fn test_register_from_many_threads() {
        let index = NamespaceIndex::new();
        let nodes: Vec<Arc<String>> = (0..8).map(|i| node(&format!("T{i}"))).collect();
        std::thread::scope(|scope| {
            for (i, n) in nodes.iter().enumerate() {
                let index = &index;
                scope.spawn(move || index.register("shared", &format!("T{i}"), n).unwrap());
            }
        });
        assert_eq!(index.len(), 8);
        assert!(Arc::ptr_eq(&index.get("shared", "T3").unwrap(), &nodes[3]));
    }
}
