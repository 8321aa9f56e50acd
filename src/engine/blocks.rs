use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Blocking periods of one scope, sorted by `span.start`.
#[derive(Debug, Clone, Default)]
pub struct BlockList {
    blocks: Vec<Block>,
}

impl BlockList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, block: Block) {
        let pos = self
            .blocks
            .binary_search_by_key(&block.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.blocks.insert(pos, block);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Block> {
        let pos = self.blocks.iter().position(|b| b.id == id)?;
        Some(self.blocks.remove(pos))
    }

    /// Blocks whose span overlaps the query window.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Block> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self.blocks.partition_point(|b| b.span.start < query.end);
        self.blocks[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// Every block that affects one professional inside `window`: their own plus
/// organization-wide ones, sorted by start.
pub fn blocks_in<'a>(own: &'a BlockList, org: &'a BlockList, window: &Span) -> Vec<&'a Block> {
    let mut hits: Vec<&Block> = own.overlapping(window).chain(org.overlapping(window)).collect();
    hits.sort_by_key(|b| b.span.start);
    hits
}

pub fn validate_block(block: &Block) -> Result<(), EngineError> {
    let span = block.span;
    if span.start >= span.end {
        return Err(EngineError::validation("block must end after it starts"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::validation("block timestamp out of range"));
    }
    if span.duration_ms() > MAX_BLOCK_DURATION_MS {
        return Err(EngineError::validation("block too long"));
    }
    if block.reason.as_ref().is_some_and(|r| r.len() > MAX_LABEL_LEN) {
        return Err(EngineError::validation("block reason too long"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(start: Ms, end: Ms, kind: BlockKind, scope: BlockScope) -> Block {
        Block {
            id: Ulid::new(),
            scope,
            kind,
            span: Span { start, end },
            reason: None,
        }
    }

    #[test]
    fn insert_keeps_order() {
        let mut list = BlockList::new();
        list.insert(block(300, 400, BlockKind::Other, BlockScope::Organization));
        list.insert(block(100, 200, BlockKind::Other, BlockScope::Organization));
        list.insert(block(200, 300, BlockKind::Other, BlockScope::Organization));
        let starts: Vec<Ms> = list.iter().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn overlapping_is_half_open() {
        let mut list = BlockList::new();
        list.insert(block(100, 200, BlockKind::Personal, BlockScope::Organization));
        assert_eq!(list.overlapping(&Span::new(200, 300)).count(), 0);
        assert_eq!(list.overlapping(&Span::new(0, 100)).count(), 0);
        assert_eq!(list.overlapping(&Span::new(199, 300)).count(), 1);
    }

    #[test]
    fn multi_day_block_hits_inner_window() {
        let mut list = BlockList::new();
        list.insert(block(0, 10_000, BlockKind::Vacation, BlockScope::Organization));
        assert_eq!(list.overlapping(&Span::new(5_000, 6_000)).count(), 1);
    }

    #[test]
    fn remove_by_id() {
        let mut list = BlockList::new();
        let b = block(100, 200, BlockKind::Holiday, BlockScope::Organization);
        let id = b.id;
        list.insert(b);
        assert!(list.remove(Ulid::new()).is_none());
        assert_eq!(list.remove(id).map(|b| b.kind), Some(BlockKind::Holiday));
        assert!(list.iter().next().is_none());
    }

    #[test]
    fn own_and_org_blocks_combine() {
        let pid = Ulid::new();
        let mut own = BlockList::new();
        let mut org = BlockList::new();
        own.insert(block(500, 600, BlockKind::Training, BlockScope::Professional(pid)));
        org.insert(block(100, 200, BlockKind::Holiday, BlockScope::Organization));
        org.insert(block(5_000, 6_000, BlockKind::Maintenance, BlockScope::Organization));

        let hits = blocks_in(&own, &org, &Span::new(0, 1_000));
        let kinds: Vec<BlockKind> = hits.iter().map(|b| b.kind).collect();
        assert_eq!(kinds, vec![BlockKind::Holiday, BlockKind::Training]);
    }

    #[test]
    fn validation_rejects_inverted_block() {
        let b = block(200, 100, BlockKind::Other, BlockScope::Organization);
        assert!(matches!(validate_block(&b), Err(EngineError::Validation(_))));
        let ok = block(100, 200, BlockKind::Other, BlockScope::Organization);
        assert!(validate_block(&ok).is_ok());
    }
}
