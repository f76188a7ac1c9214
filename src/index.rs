// Copyright 2026 Recalldb Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{bail, Result};

const KMEANS_ITERATIONS: usize = 10;

/// Topology parameters derived from the corpus size.
#[derive(Debug, Clone, Copy)]
pub struct IndexParams {
    /// Number of IVF partitions; `None` selects the exact flat topology.
    pub num_partitions: Option<usize>,
    /// Partitions probed per search (IVF only).
    pub nprobe: usize,
}

impl IndexParams {
    /// Below `flat_threshold` rows a brute-force scan is faster than any
    /// clustered index; above it, partitions scale with sqrt of the corpus.
    pub fn for_corpus(row_count: usize, flat_threshold: usize, nprobe: usize) -> Self {
        if row_count < flat_threshold.max(1) {
            return Self {
                num_partitions: None,
                nprobe,
            };
        }

        let num_partitions = ((row_count as f64).sqrt() as usize).clamp(2, 100);
        Self {
            num_partitions: Some(num_partitions),
            nprobe: nprobe.clamp(1, num_partitions),
        }
    }
}

/// In-memory nearest-neighbor index over L2-normalized vectors.
///
/// Scores are inner products of normalized vectors, i.e. cosine similarity
/// in [-1, 1], higher is more similar. Slots are assigned in insertion
/// order and never invalidated.
pub enum VectorIndex {
    Flat(FlatIndex),
    IvfFlat(IvfFlatIndex),
}

impl VectorIndex {
    /// Build an index over the given vectors, choosing the topology from
    /// the corpus size. The IVF topology runs a one-time k-means training
    /// pass; later `add` calls append without retraining.
    pub fn build(
        vectors: Vec<Vec<f32>>,
        dim: usize,
        flat_threshold: usize,
        nprobe: usize,
    ) -> Result<Self> {
        if dim == 0 {
            bail!("vector dimension must be non-zero");
        }
        for v in &vectors {
            if v.len() != dim {
                bail!("vector dimension mismatch: expected {}, got {}", dim, v.len());
            }
        }

        let params = IndexParams::for_corpus(vectors.len(), flat_threshold, nprobe);
        let index = match params.num_partitions {
            None => {
                let mut flat = FlatIndex::new(dim);
                for v in vectors {
                    flat.add(v);
                }
                VectorIndex::Flat(flat)
            }
            Some(num_partitions) => {
                let mut ivf = IvfFlatIndex::train(&vectors, dim, num_partitions, params.nprobe);
                for v in vectors {
                    ivf.add(v);
                }
                VectorIndex::IvfFlat(ivf)
            }
        };

        Ok(index)
    }

    /// Append a vector, returning its slot. Append-only for both
    /// topologies; an already-trained IVF index assigns the nearest
    /// centroid without retraining.
    pub fn add(&mut self, vector: Vec<f32>) -> Result<usize> {
        if vector.len() != self.dim() {
            bail!(
                "vector dimension mismatch: expected {}, got {}",
                self.dim(),
                vector.len()
            );
        }

        Ok(match self {
            VectorIndex::Flat(flat) => flat.add(vector),
            VectorIndex::IvfFlat(ivf) => ivf.add(vector),
        })
    }

    /// K-nearest-neighbor search. Returns at most `k` `(slot, score)`
    /// pairs in descending score order; fewer when the index holds fewer
    /// vectors than `k`.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if k == 0 || query.len() != self.dim() {
            return Vec::new();
        }

        let mut query = query.to_vec();
        normalize(&mut query);

        match self {
            VectorIndex::Flat(flat) => flat.search(&query, k),
            VectorIndex::IvfFlat(ivf) => ivf.search(&query, k),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            VectorIndex::Flat(flat) => flat.vectors.len(),
            VectorIndex::IvfFlat(ivf) => ivf.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dim(&self) -> usize {
        match self {
            VectorIndex::Flat(flat) => flat.dim,
            VectorIndex::IvfFlat(ivf) => ivf.dim,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            VectorIndex::Flat(_) => "flat",
            VectorIndex::IvfFlat(_) => "ivf_flat",
        }
    }
}

/// Exact brute-force index.
pub struct FlatIndex {
    dim: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: Vec::new(),
        }
    }

    fn add(&mut self, mut vector: Vec<f32>) -> usize {
        normalize(&mut vector);
        self.vectors.push(vector);
        self.vectors.len() - 1
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(slot, v)| (slot, dot(query, v)))
            .collect();

        top_k(&mut scored, k);
        scored
    }
}

/// Clustered approximate index: k-means centroids with per-partition
/// inverted lists, probing the `nprobe` nearest partitions per search.
pub struct IvfFlatIndex {
    dim: usize,
    nprobe: usize,
    centroids: Vec<Vec<f32>>,
    lists: Vec<Vec<(usize, Vec<f32>)>>,
    len: usize,
}

impl IvfFlatIndex {
    fn train(vectors: &[Vec<f32>], dim: usize, num_partitions: usize, nprobe: usize) -> Self {
        let mut training: Vec<Vec<f32>> = vectors
            .iter()
            .map(|v| {
                let mut v = v.clone();
                normalize(&mut v);
                v
            })
            .collect();
        let k = num_partitions.min(training.len()).max(1);
        let centroids = kmeans(&mut training, dim, k);

        Self {
            dim,
            nprobe: nprobe.clamp(1, centroids.len()),
            lists: vec![Vec::new(); centroids.len()],
            centroids,
            len: 0,
        }
    }

    fn add(&mut self, mut vector: Vec<f32>) -> usize {
        normalize(&mut vector);
        let slot = self.len;
        let partition = nearest_centroid(&self.centroids, &vector);
        self.lists[partition].push((slot, vector));
        self.len += 1;
        slot
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut ranked: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, dot(query, c)))
            .collect();
        top_k(&mut ranked, self.nprobe);

        let mut scored: Vec<(usize, f32)> = Vec::new();
        for (partition, _) in ranked {
            for (slot, v) in &self.lists[partition] {
                scored.push((*slot, dot(query, v)));
            }
        }

        top_k(&mut scored, k);
        scored
    }
}

fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn top_k(scored: &mut Vec<(usize, f32)>, k: usize) {
    scored.sort_unstable_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
}

fn nearest_centroid(centroids: &[Vec<f32>], vector: &[f32]) -> usize {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let score = dot(vector, c);
        if score > best_score {
            best_score = score;
            best = i;
        }
    }
    best
}

/// Lloyd's k-means over normalized vectors, cosine assignment. Centroids
/// are seeded from evenly spaced samples; empty clusters keep their
/// previous centroid.
fn kmeans(vectors: &mut [Vec<f32>], dim: usize, k: usize) -> Vec<Vec<f32>> {
    let stride = (vectors.len() / k).max(1);
    let mut centroids: Vec<Vec<f32>> = (0..k).map(|i| vectors[(i * stride) % vectors.len()].clone()).collect();

    for _ in 0..KMEANS_ITERATIONS {
        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];

        for v in vectors.iter() {
            let assigned = nearest_centroid(&centroids, v);
            counts[assigned] += 1;
            for (s, x) in sums[assigned].iter_mut().zip(v.iter()) {
                *s += x;
            }
        }

        for i in 0..k {
            if counts[i] == 0 {
                continue;
            }
            let mut centroid = sums[i].clone();
            for x in centroid.iter_mut() {
                *x /= counts[i] as f32;
            }
            normalize(&mut centroid);
            centroids[i] = centroid;
        }
    }

    centroids
}
