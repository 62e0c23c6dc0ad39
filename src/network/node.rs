use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    addr: String,
}

impl Node {
    fn new(addr: String) -> Node {
        Node { addr }
    }

    pub fn get_addr(&self) -> &str {
        self.addr.as_str()
    }
}

/// Known peers in insertion order. The first entry is the relay node.
pub struct Nodes {
    inner: RwLock<Vec<Node>>,
}

impl Default for Nodes {
    fn default() -> Self {
        Self::new()
    }
}

impl Nodes {
    pub fn new() -> Nodes {
        Nodes {
            inner: RwLock::new(vec![]),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Node>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Node>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `addr` unless it is already known. Returns whether it was new.
    pub fn add_node(&self, addr: &str) -> bool {
        let mut inner = self.write();
        if inner.iter().any(|x| x.get_addr() == addr) {
            return false;
        }
        inner.push(Node::new(addr.to_string()));
        true
    }

    pub fn evict_node(&self, addr: &str) {
        let mut inner = self.write();
        if let Some(idx) = inner.iter().position(|x| x.get_addr() == addr) {
            inner.remove(idx);
        }
    }

    pub fn first(&self) -> Option<Node> {
        self.read().first().cloned()
    }

    pub fn get_nodes(&self) -> Vec<Node> {
        self.read().to_vec()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn node_is_known(&self, addr: &str) -> bool {
        self.read().iter().any(|x| x.get_addr() == addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership() {
        let nodes = Nodes::new();
        assert!(nodes.add_node("localhost:3000"));
        assert!(nodes.add_node("localhost:3001"));
        assert!(!nodes.add_node("localhost:3000"));

        assert_eq!(nodes.len(), 2);
        assert_eq!(
            nodes.first().map(|n| n.get_addr().to_string()),
            Some("localhost:3000".to_string())
        );

        nodes.evict_node("localhost:3000");
        assert!(!nodes.node_is_known("localhost:3000"));
        assert_eq!(nodes.first().unwrap().get_addr(), "localhost:3001");
    }
}
