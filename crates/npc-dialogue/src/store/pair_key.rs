use crate::models::ParticipantId;

/// Order-independent key for the pair-memory index.
/// The smaller id always goes first, so (a, b) and (b, a) collapse to one key.
pub fn pair_key(a: ParticipantId, b: ParticipantId) -> u64 {
    let (lo, hi) = if a <= b { (a.0 as u64, b.0 as u64) } else { (b.0 as u64, a.0 as u64) };
    (lo << 32) | hi
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_key_symmetric() {
        for a in 0..40u32 {
            for b in 0..40u32 {
                assert_eq!(
                    pair_key(ParticipantId(a), ParticipantId(b)),
                    pair_key(ParticipantId(b), ParticipantId(a))
                );
            }
        }
    }

    #[test]
    fn test_pair_key_distinguishes_pairs() {
        let ab = pair_key(ParticipantId(1), ParticipantId(2));
        let ac = pair_key(ParticipantId(1), ParticipantId(3));
        let bc = pair_key(ParticipantId(2), ParticipantId(3));
        assert_ne!(ab, ac);
        assert_ne!(ab, bc);
        assert_ne!(ac, bc);
        assert_ne!(
            pair_key(ParticipantId(u32::MAX), ParticipantId(0)),
            pair_key(ParticipantId(0), ParticipantId(0))
        );
    }
}
