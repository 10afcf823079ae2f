//! Wrapper types around Bitvec.
use bitvec::prelude::*;

/// Bitfield where index = piece.
pub type Bitfield = BitVec<u8, Msb0>;

pub trait PieceBitfield {
    /// An empty bitfield able to hold `pieces` pieces.
    fn from_piece(pieces: usize) -> Bitfield {
        bitvec![u8, Msb0; 0; pieces]
    }

    /// Bitfield from wire bytes, cut or padded to `len` bits. Spare bits of the
    /// last byte are cleared so they never travel back over the wire.
    fn new_and_resize(vec: Vec<u8>, len: usize) -> Bitfield {
        let mut s = Bitfield::from_vec(vec);
        s.resize(len, false);
        s.set_uninitialized(false);
        s
    }

    /// If `self` has at least one piece that `local` doesn't.
    fn has_piece_not_in(&self, local: &Bitfield) -> bool;

    /// Indices of the pieces that `self` has and `local` doesn't.
    fn pieces_not_in(&self, local: &Bitfield) -> Vec<usize>;
}

impl PieceBitfield for Bitfield {
    fn has_piece_not_in(&self, local: &Bitfield) -> bool {
        self.iter_ones().any(|i| !local.get(i).map(|b| *b).unwrap_or(false))
    }

    fn pieces_not_in(&self, local: &Bitfield) -> Vec<usize> {
        self.iter_ones()
            .filter(|i| !local.get(*i).map(|b| *b).unwrap_or(false))
            .collect()
    }
}
