//! IVF-PQ index artifact: coarse centroids, a global PQ codebook, and one
//! posting list of `(row_id, codes)` per partition.

use crate::distance::{normalize_in_place, MetricType};
use crate::ivf::IvfCentroids;
use crate::quantization::PqCodebook;
use serde::{Deserialize, Serialize};

/// Rows assigned to one partition. `codes` holds `num_sub_vectors` bytes per
/// row, in the same order as `row_ids`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostingList {
    pub row_ids: Vec<u64>,
    pub codes: Vec<u8>,
}

impl PostingList {
    pub fn len(&self) -> usize {
        self.row_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvfPqIndex {
    pub dim: usize,
    pub metric: MetricType,
    pub ivf: IvfCentroids,
    pub codebook: PqCodebook,
    /// One list per partition, indexed by partition id.
    pub partitions: Vec<PostingList>,
}

impl IvfPqIndex {
    /// An index with no centroids and no rows, as built over an empty table.
    pub fn empty(ivf: IvfCentroids, codebook: PqCodebook) -> Self {
        let partitions = vec![PostingList::default(); ivf.num_partitions()];
        Self {
            dim: ivf.dim,
            metric: ivf.metric,
            ivf,
            codebook,
            partitions,
        }
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn num_rows(&self) -> usize {
        self.partitions.iter().map(PostingList::len).sum()
    }

    pub fn partition_sizes(&self) -> Vec<usize> {
        self.partitions.iter().map(PostingList::len).collect()
    }

    /// Assign and encode one vector, appending it to its posting list.
    ///
    /// Cosine indexes store codes of the unit-normalized vector.
    pub fn insert(&mut self, row_id: u64, vector: &[f32], scratch: &mut Vec<f32>) {
        let v = self.prepare(vector, scratch);
        let partition = self.ivf.assign(v) as usize;
        let list = &mut self.partitions[partition];
        list.row_ids.push(row_id);
        self.codebook.encode_into(v, &mut list.codes);
    }

    /// Visit rows of the partitions nearest to `query` with their approximate
    /// distance, in partition-rank order. `visit` reports whether it kept the
    /// row.
    ///
    /// The `nprobes` nearest partitions are always searched. Further partitions
    /// are searched in rank order only while fewer than `min_kept` rows have been
    /// kept, so a selective caller still fills its result.
    pub fn search(
        &self,
        query: &[f32],
        nprobes: usize,
        min_kept: usize,
        mut visit: impl FnMut(u64, f32) -> bool,
    ) {
        if self.partitions.is_empty() {
            return;
        }
        let mut scratch = Vec::new();
        let q = self.prepare(query, &mut scratch);
        let table = self.codebook.distance_table(q, self.metric);
        let m = self.codebook.num_sub_vectors;
        let mut kept = 0usize;
        let ranked = self.ivf.rank(q, self.num_partitions());
        for (searched, partition) in ranked.into_iter().enumerate() {
            if searched >= nprobes && kept >= min_kept {
                break;
            }
            let list = &self.partitions[partition as usize];
            for (i, &row_id) in list.row_ids.iter().enumerate() {
                if visit(row_id, table.distance(&list.codes[i * m..(i + 1) * m])) {
                    kept += 1;
                }
            }
        }
    }

    fn prepare<'a>(&self, vector: &'a [f32], scratch: &'a mut Vec<f32>) -> &'a [f32] {
        if self.metric == MetricType::Cosine {
            scratch.clear();
            scratch.extend_from_slice(vector);
            normalize_in_place(scratch);
            scratch.as_slice()
        } else {
            vector
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clustered() -> Vec<f32> {
        let mut data = Vec::new();
        for i in 0..40 {
            let j = (i % 4) as f32 * 0.01;
            data.extend_from_slice(&[j, j, 0.0, 0.0]);
            data.extend_from_slice(&[10.0 + j, 10.0, 0.0, 0.0]);
        }
        data
    }

    fn build(metric: MetricType) -> IvfPqIndex {
        let data = clustered();
        let ivf = IvfCentroids::train(&data, 4, 2, 20, metric, 42);
        let codebook = PqCodebook::train(&data, 4, 2, 4, 20, 42).unwrap();
        let mut index = IvfPqIndex::empty(ivf, codebook);
        let mut scratch = Vec::new();
        for (row, v) in data.chunks(4).enumerate() {
            index.insert(row as u64, v, &mut scratch);
        }
        index
    }

    #[test]
    fn test_every_row_in_exactly_one_partition() {
        let index = build(MetricType::L2);
        assert_eq!(index.num_partitions(), 2);
        assert_eq!(index.num_rows(), 80);
        let mut seen: Vec<u64> = index
            .partitions
            .iter()
            .flat_map(|p| p.row_ids.iter().copied())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..80).collect::<Vec<_>>());
        for p in &index.partitions {
            assert_eq!(p.codes.len(), p.len() * 2);
        }
    }

    #[test]
    fn test_single_partition_visits_nearest_only() {
        let index = build(MetricType::L2);
        let mut visited = Vec::new();
        index.search(&[10.0, 10.0, 0.0, 0.0], 1, 0, |row, _| {
            visited.push(row);
            true
        });
        assert_eq!(visited.len(), 40);
        assert!(visited.iter().all(|r| r % 2 == 1));
    }

    #[test]
    fn test_probes_past_nprobes_until_min_kept() {
        let index = build(MetricType::L2);
        let mut visited = Vec::new();
        // Keep only rows from the far cluster.
        index.search(&[10.0, 10.0, 0.0, 0.0], 1, 5, |row, _| {
            visited.push(row);
            row % 2 == 0
        });
        assert_eq!(visited.len(), 80);

        let mut visited = 0;
        index.search(&[10.0, 10.0, 0.0, 0.0], 1, 5, |_, _| {
            visited += 1;
            true
        });
        assert_eq!(visited, 40);
    }

    #[test]
    fn test_empty_index_search_is_noop() {
        let ivf = IvfCentroids::train(&[], 4, 8, 10, MetricType::L2, 42);
        let codebook = PqCodebook::train(&[], 4, 2, 4, 10, 42).unwrap();
        let index = IvfPqIndex::empty(ivf, codebook);
        let mut count = 0;
        index.search(&[0.0; 4], 8, 0, |_, _| {
            count += 1;
            true
        });
        assert_eq!(count, 0);
        assert_eq!(index.num_rows(), 0);
    }
}
