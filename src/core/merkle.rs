//! Merkle-root commitment over a block's transactions.

use crate::crypto::sha256_digest;

/// Computes the Merkle root of an ordered list of byte strings.
///
/// Leaves are the SHA-256 of each input; every interior node is the SHA-256
/// of the concatenation of its children. A level of odd length duplicates its
/// last element before pairing.
///
/// The root of an empty list is undefined; callers must not pass one.
pub fn merkle_root(items: &[Vec<u8>]) -> Vec<u8> {
    debug_assert!(!items.is_empty(), "merkle root of an empty list");

    let mut level: Vec<Vec<u8>> = items.iter().map(|item| sha256_digest(item)).collect();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = level.last().cloned().unwrap_or_default();
            level.push(last);
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let mut combined = pair[0].clone();
                combined.extend_from_slice(pair[1].as_slice());
                sha256_digest(combined.as_slice())
            })
            .collect();
    }
    level.swap_remove(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_element_root_is_its_hash() {
        let item = b"only transaction".to_vec();
        assert_eq!(merkle_root(&[item.clone()]), sha256_digest(&item));
    }

    #[test]
    fn two_element_root_pairs_leaf_hashes() {
        let left = b"left".to_vec();
        let right = b"right".to_vec();

        let mut combined = sha256_digest(&left);
        combined.extend_from_slice(&sha256_digest(&right));
        let expected = sha256_digest(&combined);

        assert_eq!(merkle_root(&[left, right]), expected);
    }

    #[test]
    fn odd_list_duplicates_last_element() {
        let a = b"a".to_vec();
        let b = b"b".to_vec();
        let c = b"c".to_vec();

        let odd = merkle_root(&[a.clone(), b.clone(), c.clone()]);
        let padded = merkle_root(&[a, b, c.clone(), c]);
        assert_eq!(odd, padded);
    }

    #[test]
    fn root_depends_on_order() {
        let a = b"a".to_vec();
        let b = b"b".to_vec();
        assert_ne!(
            merkle_root(&[a.clone(), b.clone()]),
            merkle_root(&[b, a])
        );
    }
}
