//! Prefix tree over filesystem paths.
//!
//! Keys are split into path segments with the trie's [`PathStyle`]; each
//! node holds at most one value. Lookups walk the filesystem hierarchy, so
//! the value found for a path is the one stored at its nearest configured
//! ancestor.

use std::collections::{BTreeMap, HashMap};

use crate::paths::PathStyle;

#[derive(Debug, Clone)]
struct Node<T> {
    value: Option<T>,
    children: BTreeMap<String, Node<T>>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            value: None,
            children: BTreeMap::new(),
        }
    }
}

/// A path-keyed trie with an auxiliary index of logical names.
#[derive(Debug, Clone)]
pub struct ConfigTrie<T> {
    root: Node<T>,
    style: PathStyle,
    /// Logical name → normalized key.
    names: HashMap<String, String>,
    len: usize,
}

impl<T> Default for ConfigTrie<T> {
    fn default() -> Self {
        Self::new(PathStyle::native())
    }
}

impl<T> ConfigTrie<T> {
    /// Create an empty trie splitting keys with the given style's rules.
    pub fn new(style: PathStyle) -> Self {
        Self {
            root: Node::default(),
            style,
            names: HashMap::new(),
            len: 0,
        }
    }

    fn segments(&self, path: &str) -> Vec<String> {
        let normalized = self.style.normalize(path);
        normalized
            .split(self.style.separator())
            .filter(|s| !s.is_empty())
            .map(|s| match self.style {
                PathStyle::Posix => s.to_string(),
                PathStyle::Windows => s.to_lowercase(),
            })
            .collect()
    }

    /// Insert `value` at the node for `key`, creating intermediate nodes.
    ///
    /// Returns the value previously stored at exactly that node, if any.
    pub fn add(&mut self, key: &str, value: T) -> Option<T> {
        let segments = self.segments(key);
        let mut node = &mut self.root;
        for segment in segments {
            node = node.children.entry(segment).or_default();
        }
        let previous = node.value.replace(value);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Insert like [`add`](Self::add) and register `name` as a logical
    /// alias for the key.
    pub fn add_named(&mut self, key: &str, name: &str, value: T) -> Option<T> {
        let normalized = self.style.normalize(key);
        self.names.retain(|_, k| *k != normalized);
        self.names.insert(name.to_string(), normalized.clone());
        self.add(&normalized, value)
    }

    fn exact(&self, key: &str) -> Option<&T> {
        let mut node = &self.root;
        for segment in self.segments(key) {
            node = node.children.get(&segment)?;
        }
        node.value.as_ref()
    }

    /// Longest-prefix match: the value of the deepest valued node on the
    /// way from the root to `path`.
    pub fn find_prefix(&self, path: &str) -> Option<&T> {
        let mut node = &self.root;
        let mut found = node.value.as_ref();
        for segment in self.segments(path) {
            match node.children.get(&segment) {
                Some(child) => {
                    node = child;
                    if child.value.is_some() {
                        found = child.value.as_ref();
                    }
                }
                None => break,
            }
        }
        found
    }

    /// Exact lookup by logical name, independent of nesting.
    ///
    /// Falls back to treating `name` as a key when no alias matches.
    pub fn find_node_ex(&self, name: &str) -> Option<&T> {
        match self.names.get(name) {
            Some(key) => self.exact(key),
            None => self.exact(name),
        }
    }

    /// Every stored value, in key order.
    pub fn get_all_values(&self) -> Vec<&T> {
        fn collect<'a, T>(node: &'a Node<T>, out: &mut Vec<&'a T>) {
            if let Some(value) = &node.value {
                out.push(value);
            }
            for child in node.children.values() {
                collect(child, out);
            }
        }

        let mut out = Vec::with_capacity(self.len);
        collect(&self.root, &mut out);
        out
    }

    /// One value per subtree: the valued node closest to the root. Values
    /// nested below it are skipped.
    pub fn find_values_with_shortest_branch(&self) -> Vec<&T> {
        fn collect<'a, T>(node: &'a Node<T>, out: &mut Vec<&'a T>) {
            if let Some(value) = &node.value {
                out.push(value);
                return;
            }
            for child in node.children.values() {
                collect(child, out);
            }
        }

        let mut out = Vec::new();
        collect(&self.root, &mut out);
        out
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posix() -> ConfigTrie<&'static str> {
        ConfigTrie::new(PathStyle::Posix)
    }

    #[test]
    fn find_prefix_disjoint_contexts() {
        let mut trie = posix();
        trie.add("/ws/a", "A");
        trie.add("/ws/b", "B");

        assert_eq!(trie.find_prefix("/ws/a/file.txt"), Some(&"A"));
        assert_eq!(trie.find_prefix("/ws/b/deep/er/file"), Some(&"B"));
        assert_eq!(trie.find_prefix("/ws/a"), Some(&"A"));
        assert_eq!(trie.find_prefix("/ws/c/file"), None);
        assert_eq!(trie.find_prefix("/ws"), None);
        assert_eq!(trie.find_prefix("/elsewhere"), None);
    }

    #[test]
    fn find_prefix_prefers_deepest_context() {
        let mut trie = posix();
        trie.add("/ws", "outer");
        trie.add("/ws/inner", "inner");

        assert_eq!(trie.find_prefix("/ws/inner/x.txt"), Some(&"inner"));
        assert_eq!(trie.find_prefix("/ws/other/x.txt"), Some(&"outer"));
        assert_eq!(trie.find_prefix("/ws/innerx/y"), Some(&"outer"));
    }

    #[test]
    fn find_prefix_normalizes_the_query() {
        let mut trie = posix();
        trie.add("/ws/a/", "A");
        assert_eq!(trie.find_prefix("/ws//b/../a/./f"), Some(&"A"));
    }

    #[test]
    fn add_overwrites_exact_node() {
        let mut trie = posix();
        assert_eq!(trie.add("/ws", "first"), None);
        assert_eq!(trie.add("/ws/", "second"), Some("first"));
        assert_eq!(trie.len(), 1);
        assert_eq!(trie.find_prefix("/ws/x"), Some(&"second"));
    }

    #[test]
    fn shortest_branch_skips_nested_values() {
        let mut trie = posix();
        trie.add("/ws", "outer");
        trie.add("/ws/inner", "inner");
        trie.add("/other/site", "site");

        let mut values = trie.find_values_with_shortest_branch();
        values.sort();
        assert_eq!(values, vec![&"outer", &"site"]);

        let mut all = trie.get_all_values();
        all.sort();
        assert_eq!(all, vec![&"inner", &"outer", &"site"]);
    }

    #[test]
    fn find_node_ex_uses_logical_names() {
        let mut trie = posix();
        trie.add_named("/ws", "ws", "outer");
        trie.add_named("/ws/inner", "ws/inner", "inner");

        assert_eq!(trie.find_node_ex("ws/inner"), Some(&"inner"));
        assert_eq!(trie.find_node_ex("ws"), Some(&"outer"));
        assert_eq!(trie.find_node_ex("/ws/inner"), Some(&"inner"));
        assert_eq!(trie.find_node_ex("missing"), None);
    }

    #[test]
    fn find_node_ex_is_exact() {
        let mut trie = posix();
        trie.add_named("/ws", "ws", "outer");
        assert_eq!(trie.find_node_ex("/ws/sub"), None);
    }

    #[test]
    fn windows_keys_fold_case_and_drive() {
        let mut trie = ConfigTrie::new(PathStyle::Windows);
        trie.add("C:\\Work\\Site", "site");
        assert_eq!(trie.find_prefix("c:\\work\\site\\index.html"), Some(&"site"));
        assert_eq!(trie.find_prefix("C:/Work/Site/a"), Some(&"site"));
        assert_eq!(trie.find_prefix("d:\\work\\site"), None);
    }

    #[test]
    fn empty_trie() {
        let trie = posix();
        assert!(trie.is_empty());
        assert_eq!(trie.find_prefix("/anything"), None);
        assert!(trie.get_all_values().is_empty());
    }
}
