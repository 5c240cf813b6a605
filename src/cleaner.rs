//! Guard against reusing one underlying track record in two roles of a
//! triplet. Close-pair rejection handles tracks that are merely close; this
//! rejects literal identity.

use crate::event::Particle;

/// True when the two records are distinct tracks and may share a triplet.
pub fn is_clean_pair(p1: &Particle, p2: &Particle) -> bool {
    !p1.same_track(p2)
}
