// Keyed list reconciliation. The synchronizer walks the new items in order against a
// cursor into the old list. A key equal to the cursor's is retained and both advance. A
// key found elsewhere is either moved (its node was already passed by a forward scan) or
// reached by scanning forward, marking every skipped node as seen. An unknown key is
// inserted before the cursor. Once the new items run out, every old node that was not
// retained in this pass is deleted. The target receives the matching callbacks and is
// responsible for the DOM and updating-opcode side of each operation.

//! Keyed list reconciliation.

use super::iterable::{ItemRefs, IterationArtifacts, IterationItem};
use crate::core::VmResult;
use std::rc::Rc;

/// Receiver of reconciliation operations.
pub trait SyncTarget {
    fn retain(&mut self, item: &ItemRefs) -> VmResult<()>;
    fn insert(&mut self, item: &ItemRefs, before: Option<&str>) -> VmResult<()>;
    fn move_item(&mut self, item: &ItemRefs, before: Option<&str>) -> VmResult<()>;
    fn delete(&mut self, key: &str) -> VmResult<()>;
    fn done(&mut self) -> VmResult<()>;
}

enum Phase {
    Append,
    Prune,
    Done,
}

pub struct IteratorSynchronizer<'a, T: SyncTarget> {
    artifacts: Rc<IterationArtifacts>,
    target: &'a mut T,
    items: std::vec::IntoIter<IterationItem>,
    current: Option<usize>,
}

impl<'a, T: SyncTarget> IteratorSynchronizer<'a, T> {
    pub fn new(artifacts: Rc<IterationArtifacts>, target: &'a mut T) -> VmResult<Self> {
        let items = artifacts.iterate()?;
        let current = artifacts.head();
        Ok(Self {
            artifacts,
            target,
            items,
            current,
        })
    }

    pub fn sync(mut self) -> VmResult<()> {
        let mut phase = Phase::Append;
        loop {
            phase = match phase {
                Phase::Append => self.next_append()?,
                Phase::Prune => self.next_prune()?,
                Phase::Done => return self.target.done(),
            };
        }
    }

    fn current_key(&self) -> Option<String> {
        self.current.and_then(|index| self.artifacts.key_of(index))
    }

    fn next_append(&mut self) -> VmResult<Phase> {
        let item = match self.items.next() {
            Some(item) => item,
            None => {
                self.current = self.artifacts.head();
                return Ok(Phase::Prune);
            }
        };

        if self.current_key().as_deref() == Some(item.key.as_str()) {
            self.next_retain(&item)?;
        } else if self.artifacts.has(&item.key) {
            self.next_move(&item)?;
        } else {
            self.next_insert(item)?;
        }
        Ok(Phase::Append)
    }

    fn next_retain(&mut self, item: &IterationItem) -> VmResult<()> {
        let current = match self.current {
            Some(current) => current,
            None => return Ok(()),
        };
        let refs = self.artifacts.update(current, item);
        self.current = self.artifacts.next_node(current);
        if let Some(refs) = refs {
            log::trace!("retain {}", refs.key);
            self.target.retain(&refs)?;
        }
        Ok(())
    }

    fn next_move(&mut self, item: &IterationItem) -> VmResult<()> {
        let found = match self.artifacts.get(&item.key) {
            Some(found) => found,
            None => return Ok(()),
        };
        let refs = self.artifacts.update(found, item);

        if self.artifacts.was_seen(&item.key) {
            let before = self.current_key();
            self.artifacts.move_before(found, self.current);
            if let Some(refs) = refs {
                log::trace!("move {} before {:?}", refs.key, before);
                self.target.move_item(&refs, before.as_deref())?;
            }
        } else {
            self.advance_to_key(&item.key);
            if let Some(refs) = refs {
                log::trace!("retain {} (advanced)", refs.key);
                self.target.retain(&refs)?;
            }
        }
        Ok(())
    }

    fn advance_to_key(&mut self, key: &str) {
        let mut seek = self.current;
        while let Some(index) = seek {
            if self.artifacts.key_of(index).as_deref() == Some(key) {
                break;
            }
            self.artifacts.mark_seen(index);
            seek = self.artifacts.next_node(index);
        }
        self.current = seek.and_then(|index| self.artifacts.next_node(index));
    }

    fn next_insert(&mut self, item: IterationItem) -> VmResult<()> {
        let before = self.current_key();
        let refs = self.artifacts.insert_before(item, self.current);
        log::trace!("insert {} before {:?}", refs.key, before);
        self.target.insert(&refs, before.as_deref())
    }

    fn next_prune(&mut self) -> VmResult<Phase> {
        let node = match self.current {
            Some(node) => node,
            None => return Ok(Phase::Done),
        };
        self.current = self.artifacts.next_node(node);

        if self.artifacts.should_remove(node) {
            if let Some(key) = self.artifacts.key_of(node) {
                self.artifacts.remove(node);
                log::trace!("delete {}", key);
                self.target.delete(&key)?;
            }
        } else {
            self.artifacts.reset(node);
        }
        Ok(Phase::Prune)
    }
}
