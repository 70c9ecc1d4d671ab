//! Pairing of a flat page list into book-like spreads.
//!
//! The front and back covers always stand alone. Interior pages are paired two
//! at a time; an odd interior page left over at the end becomes a single spread
//! of its own instead of being folded into the back cover.

use std::sync::Arc;

use crate::backend::cache::PageImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadKind {
    Single,
    Double,
}

/// One or two pages shown together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spread {
    pub kind: SpreadKind,
    pub pages: Vec<PageImage>,
    /// Zero-based index of the first page in this spread.
    pub start_index: usize,
}

impl Spread {
    fn single(pages: &[PageImage], index: usize) -> Self {
        Self {
            kind: SpreadKind::Single,
            pages: vec![pages[index].clone()],
            start_index: index,
        }
    }

    fn double(pages: &[PageImage], index: usize) -> Self {
        Self {
            kind: SpreadKind::Double,
            pages: pages[index..index + 2].to_vec(),
            start_index: index,
        }
    }
}

pub fn compute_spreads(pages: &[PageImage]) -> Vec<Spread> {
    let n = pages.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![Spread::single(pages, 0)];
    }

    let last = n - 1;
    let mut spreads = Vec::with_capacity(n / 2 + 2);
    spreads.push(Spread::single(pages, 0));

    let mut index = 1;
    while index + 1 < last {
        spreads.push(Spread::double(pages, index));
        index += 2;
    }
    if index < last {
        spreads.push(Spread::single(pages, index));
    }

    spreads.push(Spread::single(pages, last));
    spreads
}

/// Memoizes spreads on the identity of the page list, so they are computed
/// once per issue.
#[derive(Debug)]
pub struct SpreadLayout {
    source: Option<Arc<[PageImage]>>,
    spreads: Arc<[Spread]>,
}

impl Default for SpreadLayout {
    fn default() -> Self {
        Self {
            source: None,
            spreads: Arc::from(Vec::new()),
        }
    }
}

impl SpreadLayout {
    pub fn spreads_for(&mut self, pages: &Arc<[PageImage]>) -> Arc<[Spread]> {
        let cached = self
            .source
            .as_ref()
            .is_some_and(|source| Arc::ptr_eq(source, pages));
        if !cached {
            self.spreads = Arc::from(compute_spreads(pages));
            self.source = Some(Arc::clone(pages));
        }
        Arc::clone(&self.spreads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(n: usize) -> Vec<PageImage> {
        (0..n).map(|i| PageImage::new(format!("p{i}"))).collect()
    }

    fn shape(spreads: &[Spread]) -> Vec<(SpreadKind, usize, usize)> {
        spreads
            .iter()
            .map(|s| (s.kind, s.start_index, s.pages.len()))
            .collect()
    }

    #[test]
    fn spreads_partition_every_page_list() {
        for n in 0..=64 {
            let input = pages(n);
            let spreads = compute_spreads(&input);

            let flattened: Vec<PageImage> =
                spreads.iter().flat_map(|s| s.pages.iter().cloned()).collect();
            assert_eq!(flattened, input, "n = {n}");

            for pair in spreads.windows(2) {
                assert!(pair[0].start_index < pair[1].start_index, "n = {n}");
                assert_eq!(
                    pair[0].start_index + pair[0].pages.len(),
                    pair[1].start_index,
                    "n = {n}"
                );
            }
            for spread in &spreads {
                let expected = match spread.kind {
                    SpreadKind::Single => 1,
                    SpreadKind::Double => 2,
                };
                assert_eq!(spread.pages.len(), expected, "n = {n}");
            }
        }
    }

    #[test]
    fn covers_always_stand_alone() {
        for n in 2..=64 {
            let spreads = compute_spreads(&pages(n));
            let first = spreads.first().unwrap();
            let last = spreads.last().unwrap();

            assert_eq!(first.kind, SpreadKind::Single);
            assert_eq!(first.start_index, 0);
            assert_eq!(last.kind, SpreadKind::Single);
            assert_eq!(last.start_index, n - 1);
        }
    }

    #[test]
    fn odd_interior_leaves_last_interior_page_single() {
        let spreads = compute_spreads(&pages(5));
        assert_eq!(
            shape(&spreads),
            vec![
                (SpreadKind::Single, 0, 1),
                (SpreadKind::Double, 1, 2),
                (SpreadKind::Single, 3, 1),
                (SpreadKind::Single, 4, 1),
            ]
        );
    }

    #[test]
    fn seven_pages_make_five_spreads() {
        let spreads = compute_spreads(&pages(7));
        assert_eq!(
            shape(&spreads),
            vec![
                (SpreadKind::Single, 0, 1),
                (SpreadKind::Double, 1, 2),
                (SpreadKind::Double, 3, 2),
                (SpreadKind::Single, 5, 1),
                (SpreadKind::Single, 6, 1),
            ]
        );
    }

    #[test]
    fn even_interior_pairs_everything() {
        let spreads = compute_spreads(&pages(6));
        assert_eq!(
            shape(&spreads),
            vec![
                (SpreadKind::Single, 0, 1),
                (SpreadKind::Double, 1, 2),
                (SpreadKind::Double, 3, 2),
                (SpreadKind::Single, 5, 1),
            ]
        );
    }

    #[test]
    fn small_page_lists() {
        assert!(compute_spreads(&pages(0)).is_empty());
        assert_eq!(shape(&compute_spreads(&pages(1))), vec![(SpreadKind::Single, 0, 1)]);
        assert_eq!(
            shape(&compute_spreads(&pages(2))),
            vec![(SpreadKind::Single, 0, 1), (SpreadKind::Single, 1, 1)]
        );
        assert_eq!(
            shape(&compute_spreads(&pages(3))),
            vec![
                (SpreadKind::Single, 0, 1),
                (SpreadKind::Single, 1, 1),
                (SpreadKind::Single, 2, 1),
            ]
        );
    }

    #[test]
    fn layout_is_memoized_on_page_list_identity() {
        let mut layout = SpreadLayout::default();
        let list: Arc<[PageImage]> = Arc::from(pages(7));

        let first = layout.spreads_for(&list);
        let again = layout.spreads_for(&list);
        assert!(Arc::ptr_eq(&first, &again));

        let same_content: Arc<[PageImage]> = Arc::from(pages(7));
        let recomputed = layout.spreads_for(&same_content);
        assert!(!Arc::ptr_eq(&first, &recomputed));
        assert_eq!(first, recomputed);
    }
}
