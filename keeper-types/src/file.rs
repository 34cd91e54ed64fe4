//! Splitting byte streams into chunk trees and joining them back.
//!
//! Data is cut into [`MAX_CHUNK_SIZE`] leaves. Leaves are grouped
//! [`BRANCHES`] at a time into intermediate chunks whose payload is the
//! concatenation of child addresses and whose span is the sum of the child
//! spans. A single trailing child is promoted to the next level as is.
//! The root address is the reference of the whole stream.

use crate::address::Address;
use crate::chunk::{Chunk, MAX_CHUNK_SIZE, SEGMENT_SIZE};
use crate::error::ChunkError;

/// Children per intermediate chunk.
pub const BRANCHES: usize = MAX_CHUNK_SIZE / SEGMENT_SIZE;

/// Split `data` into a chunk tree.
///
/// Returns the root reference and every chunk of the tree, leaves first.
pub fn split(data: &[u8]) -> Result<(Address, Vec<Chunk>), ChunkError> {
    let mut level: Vec<Chunk> = if data.is_empty() {
        vec![Chunk::new(Vec::new())?]
    } else {
        data.chunks(MAX_CHUNK_SIZE)
            .map(|leaf| Chunk::new(leaf.to_vec()))
            .collect::<Result<_, _>>()?
    };

    let mut chunks = Vec::new();
    while level.len() > 1 {
        let mut parents = Vec::with_capacity(level.len().div_ceil(BRANCHES));
        let mut rest = level.into_iter();
        loop {
            let group: Vec<Chunk> = rest.by_ref().take(BRANCHES).collect();
            match group.len() {
                0 => break,
                // A lone trailing child is carried up unchanged.
                1 => parents.extend(group),
                _ => {
                    let span = group.iter().map(Chunk::span).sum();
                    let payload: Vec<u8> = group
                        .iter()
                        .flat_map(|child| child.address().as_bytes().iter().copied())
                        .collect();
                    parents.push(Chunk::with_span(span, payload)?);
                    chunks.extend(group);
                }
            }
        }
        level = parents;
    }

    let root = level[0].address().clone();
    chunks.append(&mut level);
    Ok((root, chunks))
}

/// Reassemble the stream under `root`, fetching chunks with `fetch`.
pub fn join<F>(root: &Address, mut fetch: F) -> Result<Vec<u8>, ChunkError>
where
    F: FnMut(&Address) -> Option<Chunk>,
{
    let mut out = Vec::new();
    join_into(root, &mut fetch, &mut out)?;
    Ok(out)
}

fn join_into<F>(address: &Address, fetch: &mut F, out: &mut Vec<u8>) -> Result<(), ChunkError>
where
    F: FnMut(&Address) -> Option<Chunk>,
{
    let chunk = fetch(address).ok_or_else(|| ChunkError::NotFound(address.to_string()))?;
    let span = chunk.span();
    if span <= MAX_CHUNK_SIZE as u64 {
        if span != chunk.payload().len() as u64 {
            return Err(ChunkError::Malformed(format!(
                "leaf {address} has span {span} but {} payload bytes",
                chunk.payload().len()
            )));
        }
        out.extend_from_slice(chunk.payload());
        return Ok(());
    }
    if chunk.payload().is_empty() || chunk.payload().len() % SEGMENT_SIZE != 0 {
        return Err(ChunkError::Malformed(format!(
            "intermediate {address} payload of {} bytes",
            chunk.payload().len()
        )));
    }
    for reference in chunk.payload().chunks(SEGMENT_SIZE) {
        join_into(&Address::from_bytes(reference), fetch, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn store(chunks: Vec<Chunk>) -> HashMap<Address, Chunk> {
        chunks
            .into_iter()
            .map(|c| (c.address().clone(), c))
            .collect()
    }

    #[test]
    fn small_data_is_single_chunk() {
        let (root, chunks) = split(b"hello").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(root, crate::content_address(b"hello").unwrap());
    }

    #[test]
    fn empty_data_is_empty_chunk() {
        let (root, chunks) = split(b"").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(root, crate::content_address(b"").unwrap());
    }

    #[test]
    fn empty_data_joins_back_empty() {
        let (root, chunks) = split(b"").unwrap();
        assert_eq!(chunks[0].span(), 0);
        let store = store(chunks);
        assert_eq!(join(&root, |a| store.get(a).cloned()).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn full_chunk_stays_a_single_leaf() {
        let data: Vec<u8> = (0..MAX_CHUNK_SIZE).map(|i| (i % 251) as u8).collect();
        let (root, chunks) = split(&data).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].span(), MAX_CHUNK_SIZE as u64);
        assert_eq!(root, crate::content_address(&data).unwrap());
        let store = store(chunks);
        assert_eq!(join(&root, |a| store.get(a).cloned()).unwrap(), data);
    }

    #[test]
    fn one_byte_past_a_full_chunk_needs_a_parent() {
        let data = vec![3u8; MAX_CHUNK_SIZE + 1];
        let (root, chunks) = split(&data).unwrap();
        assert_eq!(chunks.len(), 3);
        let store = store(chunks);
        assert_eq!(join(&root, |a| store.get(a).cloned()).unwrap(), data);
    }

    #[test]
    fn multi_chunk_tree_joins_back() {
        let data: Vec<u8> = (0..(MAX_CHUNK_SIZE * 3 + 17)).map(|i| i as u8).collect();
        let (root, chunks) = split(&data).unwrap();
        // Four leaves plus one intermediate.
        assert_eq!(chunks.len(), 5);
        let root_chunk = chunks.last().unwrap();
        assert_eq!(root_chunk.address(), &root);
        assert_eq!(root_chunk.span(), data.len() as u64);

        let store = store(chunks);
        let joined = join(&root, |a| store.get(a).cloned()).unwrap();
        assert_eq!(joined, data);
    }

    #[test]
    fn two_level_tree() {
        let data = vec![9u8; MAX_CHUNK_SIZE * (BRANCHES + 1)];
        let (root, chunks) = split(&data).unwrap();
        // 129 leaves, one intermediate over the first 128, one root.
        assert_eq!(chunks.len(), BRANCHES + 1 + 1 + 1);
        let store = store(chunks);
        assert_eq!(join(&root, |a| store.get(a).cloned()).unwrap(), data);
    }

    #[test]
    fn missing_chunk_reported() {
        let data = vec![1u8; MAX_CHUNK_SIZE + 1];
        let (root, chunks) = split(&data).unwrap();
        let missing = chunks[0].address().clone();
        let mut store = store(chunks);
        store.remove(&missing);
        assert_eq!(
            join(&root, |a| store.get(a).cloned()).unwrap_err(),
            ChunkError::NotFound(missing.to_string())
        );
    }
}
