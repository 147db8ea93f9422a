use serde::{Deserialize, Serialize};

/// `(track_id, anchor_time)`. The canonical, in-memory posting shape: the
/// matcher only ever sees flat `Vec<Posting>` buckets, never the two
/// on-disk shapes (spec.md Design Notes, "Bucket postings representation").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub track: u32,
    pub t: u32,
}

/// Appends `posting` to `bucket` if it is below `bucket_cap`.
///
/// Returns `true` if the posting was appended, `false` if it was silently
/// dropped by the bucket-cap overflow policy (spec.md 4.5/4.8 — this is
/// deliberate, not an error).
pub fn try_append(bucket: &mut Vec<Posting>, posting: Posting, bucket_cap: usize) -> bool {
    if bucket.len() >= bucket_cap {
        return false;
    }
    bucket.push(posting);
    true
}

/// Regroups a bucket's postings by track and sorts each track's times
/// ascending, in place. Used by `Index::finalize`.
pub fn normalize(bucket: &mut Vec<Posting>) {
    bucket.sort_by(|a, b| a.track.cmp(&b.track).then(a.t.cmp(&b.t)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_bucket_size() {
        let mut bucket = Vec::new();
        for i in 0..10 {
            try_append(&mut bucket, Posting { track: 0, t: i }, 5);
        }
        assert_eq!(bucket.len(), 5);
    }

    #[test]
    fn normalize_groups_and_sorts() {
        let mut bucket = vec![
            Posting { track: 2, t: 9 },
            Posting { track: 1, t: 5 },
            Posting { track: 1, t: 2 },
            Posting { track: 2, t: 1 },
        ];
        normalize(&mut bucket);
        assert_eq!(
            bucket,
            vec![
                Posting { track: 1, t: 2 },
                Posting { track: 1, t: 5 },
                Posting { track: 2, t: 1 },
                Posting { track: 2, t: 9 },
            ]
        );
    }
}
