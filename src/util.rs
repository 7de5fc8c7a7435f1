use std::collections::BTreeMap;

/// 以单调递增 ID 为键的对象表
///
/// ID 从 1 开始且不复用，陈旧句柄永远不会指向新对象。
pub struct IdTable<T> {
    next_id: usize,
    items: BTreeMap<usize, T>,
}

impl<T> Default for IdTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IdTable<T> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            items: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, item: T) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.items.insert(id, item);
        id
    }

    pub fn get(&self, id: usize) -> Option<&T> {
        self.items.get(&id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut T> {
        self.items.get_mut(&id)
    }

    pub fn remove(&mut self, id: usize) -> Option<T> {
        self.items.remove(&id)
    }

    #[cfg(test)]
    pub fn contains(&self, id: usize) -> bool {
        self.items.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}
