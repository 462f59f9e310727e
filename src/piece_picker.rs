//! The swarm-wide download state: which pieces we have and how many peers
//! have each piece we still need.

use std::collections::HashMap;

use rand::{seq::SliceRandom, Rng};

use crate::{Bitfield, PieceIndex};

/// Picks the next pieces to download, rarest first.
///
/// The picker is shared by all download tasks of a swarm behind a single
/// lock, so that each update is an atomic read-modify-write.
#[derive(Debug)]
pub struct PiecePicker {
    /// The pieces we have downloaded and validated.
    downloaded: Bitfield,
    /// The number of peers that announced each piece we still need. A piece
    /// no peer announced is absent, a downloaded piece is removed.
    rarity: HashMap<PieceIndex, usize>,
}

impl PiecePicker {
    /// Creates a picker for a download of `piece_count` pieces, none of which
    /// we have yet.
    pub fn new(piece_count: usize) -> Self {
        Self {
            downloaded: Bitfield::repeat(false, piece_count),
            rarity: HashMap::new(),
        }
    }

    /// Creates a picker for a torrent we already have in full, as when
    /// seeding.
    pub fn seeded(piece_count: usize) -> Self {
        Self {
            downloaded: Bitfield::repeat(true, piece_count),
            rarity: HashMap::new(),
        }
    }

    /// Counts the peer's pieces towards their availability. Pieces we already
    /// have and indices beyond the torrent are ignored.
    pub fn register_availability(&mut self, pieces: &Bitfield) {
        for index in pieces.iter_ones() {
            if index < self.downloaded.len() && !self.downloaded[index] {
                *self.rarity.entry(index).or_default() += 1;
            }
        }
    }

    /// Returns the number of peers known to have the piece.
    pub fn rarity(&self, index: PieceIndex) -> usize {
        self.rarity.get(&index).copied().unwrap_or(0)
    }

    /// Returns up to `count` missing pieces that at least one peer has, in
    /// ascending order of availability. Ties are broken at random.
    pub fn pick_rarest(&self, count: usize) -> Vec<PieceIndex> {
        self.pick_rarest_with(count, &mut rand::thread_rng())
    }

    pub fn pick_rarest_with(
        &self,
        count: usize,
        rng: &mut impl Rng,
    ) -> Vec<PieceIndex> {
        let mut candidates: Vec<(PieceIndex, usize)> = self
            .rarity
            .iter()
            .filter(|(_, rarity)| **rarity > 0)
            .map(|(&index, &rarity)| (index, rarity))
            .collect();
        // shuffle first so that the stable sort leaves equally rare pieces in
        // random order
        candidates.shuffle(rng);
        candidates.sort_by_key(|&(_, rarity)| rarity);
        candidates
            .into_iter()
            .take(count)
            .map(|(index, _)| index)
            .collect()
    }

    /// Marks the piece as downloaded. Returns false if we already had it.
    pub fn received_piece(&mut self, index: PieceIndex) -> bool {
        match self.downloaded.get(index).map(|bit| *bit) {
            Some(false) => {
                self.downloaded.set(index, true);
                self.rarity.remove(&index);
                true
            }
            _ => false,
        }
    }

    /// The pieces we have.
    pub fn own_pieces(&self) -> &Bitfield {
        &self.downloaded
    }

    pub fn downloaded_count(&self) -> usize {
        self.downloaded.count_ones()
    }

    pub fn missing_count(&self) -> usize {
        self.downloaded.count_zeros()
    }

    /// Returns true once every piece of the torrent is downloaded.
    pub fn is_complete(&self) -> bool {
        self.downloaded.all()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, sync::Arc};

    use pretty_assertions::assert_eq;
    use tokio::sync::RwLock;

    use super::*;
    use crate::peer::codec::create_bitfield;

    #[test]
    fn should_count_peer_pieces() {
        let mut picker = PiecePicker::new(10);
        picker.register_availability(&create_bitfield([0, 3, 7], 10));

        for index in 0..10 {
            let expected = if [0, 3, 7].contains(&index) { 1 } else { 0 };
            assert_eq!(picker.rarity(index), expected);
        }
    }

    #[test]
    fn should_pick_rarest_pieces() {
        // rarity {0: 3, 1: 1, 2: 1, 3: 5}
        let mut picker = PiecePicker::new(4);
        for pieces in [
            vec![0, 1, 3],
            vec![0, 2, 3],
            vec![0, 3],
            vec![3],
            vec![3],
        ] {
            picker.register_availability(&create_bitfield(pieces, 4));
        }
        assert_eq!(picker.rarity(0), 3);
        assert_eq!(picker.rarity(3), 5);

        let picked: BTreeSet<_> = picker.pick_rarest(2).into_iter().collect();
        assert_eq!(picked, BTreeSet::from([1, 2]));
        assert_eq!(picker.pick_rarest(10)[2..], [0, 3]);
    }

    #[test]
    fn should_break_ties_at_random() {
        let mut picker = PiecePicker::new(4);
        picker.register_availability(&Bitfield::repeat(true, 4));

        let picked: BTreeSet<_> =
            (0..100).map(|_| picker.pick_rarest(1)[0]).collect();
        assert!(picked.len() > 1);
    }

    #[test]
    fn should_never_pick_unavailable_or_downloaded_pieces() {
        let mut picker = PiecePicker::new(4);
        picker.register_availability(&create_bitfield([1, 2], 4));
        assert!(picker.received_piece(1));
        assert!(!picker.received_piece(1));
        assert!(!picker.received_piece(4));

        assert_eq!(picker.pick_rarest(4), vec![2]);
        assert_eq!(picker.rarity(1), 0);

        // availability of pieces we have is not counted anymore
        picker.register_availability(&create_bitfield([1], 4));
        assert_eq!(picker.rarity(1), 0);
    }

    #[test]
    fn should_be_complete_when_all_pieces_are_downloaded() {
        let mut picker = PiecePicker::new(3);
        picker.register_availability(&Bitfield::repeat(true, 3));
        for index in 0..3 {
            assert!(!picker.is_complete());
            picker.received_piece(index);
        }
        assert!(picker.is_complete());
        assert_eq!(picker.missing_count(), 0);
        assert!(picker.pick_rarest(3).is_empty());

        let seeded = PiecePicker::seeded(3);
        assert!(seeded.is_complete());
        assert_eq!(seeded.downloaded_count(), 3);
    }

    #[tokio::test]
    async fn concurrent_updates_are_not_lost() {
        let piece_count = 64;
        let picker = Arc::new(RwLock::new(PiecePicker::new(piece_count)));

        let mut tasks = tokio::task::JoinSet::new();
        for peer in 0..32 {
            let picker = Arc::clone(&picker);
            tasks.spawn(async move {
                // every peer has the pieces that are a multiple of 1, 2 or 4
                // depending on its number
                let step = 1 << (peer % 3);
                let pieces = (0..piece_count).step_by(step);
                let bitfield = create_bitfield(pieces, piece_count);
                picker.write().await.register_availability(&bitfield);
            });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap();
        }

        // peers 0, 3, .. have every piece, 1, 4, .. every second, 2, 5, ..
        // every fourth
        let picker = picker.read().await;
        let every = (0..32).filter(|p| p % 3 == 0).count();
        let second = (0..32).filter(|p| p % 3 == 1).count();
        let fourth = (0..32).filter(|p| p % 3 == 2).count();
        assert_eq!(picker.rarity(0), every + second + fourth);
        assert_eq!(picker.rarity(2), every + second);
        assert_eq!(picker.rarity(1), every);
    }
}
