//! 分片链：带代际标签的双向链表。
//!
//! # 教案式说明
//! - **意图 (Why)**：游标需要在结构编辑之后仍能被安全地“检查”，而不是悬垂；
//!   因此链节点存放在槽位表中，外部只持有 `(槽位下标, 代际)`；
//! - **逻辑 (How)**：节点被拆分、部分消费、部分截尾或释放时调用 [`Chain::touch`] /
//!   [`Chain::remove`] 递增代际，旧句柄随即失配；单纯追加（尾分片变长或新链入尾部）
//!   不改代际；
//! - **契约 (What)**：所有链接操作 O(1)；`resolve` 对失效句柄返回 `None`。

use crate::fragment::Fragment;

/// 槽位句柄：下标 + 代际。
///
/// 代际为 `u64` 且只增不绕回：同一槽位被反复复用也不会让很久以前的旧句柄重新生效。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u64,
}

struct Node {
    fragment: Fragment,
    prev: Option<u32>,
    next: Option<u32>,
}

struct Slot {
    generation: u64,
    node: Option<Node>,
}

impl Slot {
    fn bump(&mut self) {
        self.generation += 1;
    }
}

#[derive(Default)]
pub(crate) struct Chain {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl Chain {
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn head(&self) -> Option<u32> {
        self.head
    }

    pub(crate) fn tail(&self) -> Option<u32> {
        self.tail
    }

    pub(crate) fn next(&self, index: u32) -> Option<u32> {
        self.node(index).next
    }

    pub(crate) fn prev(&self, index: u32) -> Option<u32> {
        self.node(index).prev
    }

    pub(crate) fn id(&self, index: u32) -> NodeId {
        NodeId {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    /// 校验句柄；代际不符或槽位空闲时返回 `None`。
    pub(crate) fn resolve(&self, id: NodeId) -> Option<u32> {
        let slot = self.slots.get(id.index as usize)?;
        (slot.generation == id.generation && slot.node.is_some()).then_some(id.index)
    }

    pub(crate) fn get(&self, index: u32) -> &Fragment {
        &self.node(index).fragment
    }

    /// 可变访问不改变代际；结构性修改需要另行 [`touch`](Self::touch)。
    pub(crate) fn get_mut(&mut self, index: u32) -> &mut Fragment {
        &mut self.node_mut(index).fragment
    }

    /// 递增代际，使指向该节点的旧句柄失效。
    pub(crate) fn touch(&mut self, index: u32) {
        self.slots[index as usize].bump();
    }

    pub(crate) fn push_back(&mut self, fragment: Fragment) -> u32 {
        let index = self.alloc(fragment, self.tail, None);
        match self.tail {
            Some(tail) => self.node_mut(tail).next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        index
    }

    pub(crate) fn push_front(&mut self, fragment: Fragment) -> u32 {
        let index = self.alloc(fragment, None, self.head);
        match self.head {
            Some(head) => self.node_mut(head).prev = Some(index),
            None => self.tail = Some(index),
        }
        self.head = Some(index);
        index
    }

    pub(crate) fn insert_after(&mut self, at: u32, fragment: Fragment) -> u32 {
        let next = self.node(at).next;
        let index = self.alloc(fragment, Some(at), next);
        self.node_mut(at).next = Some(index);
        match next {
            Some(next) => self.node_mut(next).prev = Some(index),
            None => self.tail = Some(index),
        }
        index
    }

    pub(crate) fn insert_before(&mut self, at: u32, fragment: Fragment) -> u32 {
        match self.node(at).prev {
            Some(prev) => self.insert_after(prev, fragment),
            None => self.push_front(fragment),
        }
    }

    /// 摘除节点并返回其分片，槽位代际递增后进入空闲表。
    pub(crate) fn remove(&mut self, index: u32) -> Fragment {
        let slot = &mut self.slots[index as usize];
        let node = slot.node.take().expect("chain index must reference a live node");
        slot.bump();
        match node.prev {
            Some(prev) => self.node_mut(prev).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.node_mut(next).prev = node.prev,
            None => self.tail = node.prev,
        }
        self.free.push(index);
        self.len -= 1;
        node.fragment
    }

    /// 释放全部节点；所有旧句柄随之失效。
    pub(crate) fn clear(&mut self) {
        let mut cursor = self.head;
        while let Some(index) = cursor {
            cursor = self.node(index).next;
            self.remove(index);
        }
        debug_assert_eq!(self.len, 0);
    }

    /// 自头向尾遍历节点下标。
    pub(crate) fn indices(&self) -> Indices<'_> {
        Indices {
            chain: self,
            cursor: self.head,
        }
    }

    fn alloc(&mut self, fragment: Fragment, prev: Option<u32>, next: Option<u32>) -> u32 {
        debug_assert!(!fragment.is_empty(), "zero-length fragments are never linked");
        let node = Node {
            fragment,
            prev,
            next,
        };
        self.len += 1;
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].node = Some(node);
                index
            }
            None => {
                let index = u32::try_from(self.slots.len()).expect("fragment slots exceed u32::MAX");
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                index
            }
        }
    }

    fn node(&self, index: u32) -> &Node {
        self.slots[index as usize]
            .node
            .as_ref()
            .expect("chain index must reference a live node")
    }

    fn node_mut(&mut self, index: u32) -> &mut Node {
        self.slots[index as usize]
            .node
            .as_mut()
            .expect("chain index must reference a live node")
    }
}

pub(crate) struct Indices<'a> {
    chain: &'a Chain,
    cursor: Option<u32>,
}

impl Iterator for Indices<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let index = self.cursor?;
        self.cursor = self.chain.next(index);
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::PageAllocator;

    fn fragment(pages: &PageAllocator, data: &[u8]) -> Fragment {
        let block = pages.heap_block(data.len()).expect("分配页");
        block.append_at(0, data);
        Fragment::from_block(block, 0, data.len())
    }

    fn contents(chain: &Chain) -> Vec<u8> {
        chain
            .indices()
            .flat_map(|index| chain.get(index).chunk().to_vec())
            .collect()
    }

    #[test]
    fn links_in_every_direction() {
        let pages = PageAllocator::new(None);
        let mut chain = Chain::default();
        let b = chain.push_back(fragment(&pages, b"b"));
        chain.push_front(fragment(&pages, b"a"));
        let d = chain.push_back(fragment(&pages, b"d"));
        chain.insert_after(b, fragment(&pages, b"c"));
        chain.insert_before(d, fragment(&pages, b"_"));
        assert_eq!(contents(&chain), b"abc_d");
        assert_eq!(chain.len(), 5);
        assert_eq!(chain.prev(b).map(|i| chain.get(i).len()), Some(1));
    }

    #[test]
    fn removed_slot_is_reused_with_new_generation() {
        let pages = PageAllocator::new(None);
        let mut chain = Chain::default();
        let first = chain.push_back(fragment(&pages, b"x"));
        let stale = chain.id(first);
        chain.remove(first);
        assert!(chain.resolve(stale).is_none());
        let reused = chain.push_back(fragment(&pages, b"y"));
        assert_eq!(reused, first, "空闲槽位应被复用");
        assert!(chain.resolve(stale).is_none(), "复用槽位后旧句柄仍然失效");
        assert_eq!(chain.resolve(chain.id(reused)), Some(reused));
    }

    #[test]
    fn touch_invalidates_only_that_node() {
        let pages = PageAllocator::new(None);
        let mut chain = Chain::default();
        let a = chain.push_back(fragment(&pages, b"a"));
        let b = chain.push_back(fragment(&pages, b"b"));
        let (id_a, id_b) = (chain.id(a), chain.id(b));
        chain.touch(a);
        assert!(chain.resolve(id_a).is_none());
        assert_eq!(chain.resolve(id_b), Some(b));
    }

    #[test]
    fn generations_do_not_wrap_past_u32() {
        let pages = PageAllocator::new(None);
        let mut chain = Chain::default();
        let a = chain.push_back(fragment(&pages, b"a"));
        let oldest = chain.id(a);
        assert_eq!(oldest.generation, 0);

        chain.slots[a as usize].generation = u64::from(u32::MAX);
        let before_wrap = chain.id(a);
        chain.touch(a);
        let current = chain.id(a);
        assert_eq!(current.generation, u64::from(u32::MAX) + 1);
        assert!(chain.resolve(before_wrap).is_none());
        assert!(chain.resolve(oldest).is_none(), "跨过 32 位边界后最早的句柄也不能复活");
        assert_eq!(chain.resolve(current), Some(a));

        chain.remove(a);
        let reused = chain.push_back(fragment(&pages, b"b"));
        assert_eq!(reused, a);
        assert!(chain.resolve(oldest).is_none());
        assert!(chain.resolve(current).is_none());
    }

    #[test]
    fn clear_empties_chain() {
        let pages = PageAllocator::new(None);
        let mut chain = Chain::default();
        chain.push_back(fragment(&pages, b"a"));
        chain.push_back(fragment(&pages, b"b"));
        chain.clear();
        assert_eq!(chain.len(), 0);
        assert!(chain.head().is_none());
        assert!(chain.tail().is_none());
        assert_eq!(pages.stats().live_pages, 0);
    }
}
